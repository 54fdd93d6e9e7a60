//! JWT 认证模块
//!
//! 提供 JWT token 生成与验证，并作为连接握手时的凭据校验器。

use application::{AuthenticatedUser, CredentialError, CredentialValidator};
use config::JwtConfig;
use domain::{UserId, Username};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token（登录流程不在本服务内，供运维与测试签发）
    pub fn generate_token(&self, user_id: Uuid, username: &str) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            user_id,
            username: username.to_string(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal_server_error(format!("Token generation failed: {}", err)))
    }
}

impl CredentialValidator for JwtService {
    fn verify(&self, token: &str) -> Result<AuthenticatedUser, CredentialError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| CredentialError::InvalidToken(err.to_string()))?;

        let username = Username::parse(claims.username)
            .map_err(|err| CredentialError::InvalidToken(err.to_string()))?;

        Ok(AuthenticatedUser {
            id: UserId::from(claims.user_id),
            username,
        })
    }
}
