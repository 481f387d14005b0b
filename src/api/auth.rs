//! Opt-in authentication and authorization.
//!
//! Disabled by default (`AUTH_MODE=none`). Enable one of:
//! - `AUTH_MODE=static`: env-defined users plus a signed session cookie.
//! - `AUTH_MODE=proxy`: trust identity headers from a trusted reverse proxy.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use super::{ApiError, ApiState};

pub const SESSION_COOKIE_NAME: &str = "soctalk_session";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Static,
    Proxy,
}

/// Roles, ordered viewer < analyst < admin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Analyst,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "analyst" => Some(Self::Analyst),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserIdentity {
    pub username: String,
    pub roles: BTreeSet<Role>,
    pub source: &'static str,
}

impl UserIdentity {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone)]
pub struct StaticUser {
    pub username: String,
    pub password_hash: String,
    pub roles: BTreeSet<Role>,
}

/// IPv4/IPv6 CIDR for trusted-proxy checks.
#[derive(Debug, Clone)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn parse(value: &str) -> Option<Self> {
        let (addr, prefix) = match value.split_once('/') {
            Some((addr, prefix)) => (addr.parse().ok()?, prefix.parse().ok()?),
            None => {
                let addr: IpAddr = value.parse().ok()?;
                let prefix = if addr.is_ipv4() { 32 } else { 128 };
                (addr, prefix)
            }
        };
        let max = if addr.is_ipv4() { 32 } else { 128 };
        (prefix <= max).then_some(Self { addr, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub users: HashMap<String, StaticUser>,
    pub session_secret: Vec<u8>,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
    pub trusted_proxy_cidrs: Vec<Cidr>,
    pub proxy_admin_groups: Vec<String>,
    pub proxy_analyst_groups: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            users: HashMap::new(),
            session_secret: ephemeral_secret(),
            session_ttl: Duration::from_secs(12 * 3600),
            cookie_secure: false,
            trusted_proxy_cidrs: Vec::new(),
            proxy_admin_groups: vec!["admin".to_string()],
            proxy_analyst_groups: vec!["analyst".to_string()],
        }
    }
}

fn ephemeral_secret() -> Vec<u8> {
    // Two v4 UUIDs give 32 random bytes without a dedicated RNG dependency.
    let mut secret = Vec::with_capacity(32);
    secret.extend_from_slice(Uuid::new_v4().as_bytes());
    secret.extend_from_slice(Uuid::new_v4().as_bytes());
    secret
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AuthConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        config.mode = match std::env::var("AUTH_MODE").unwrap_or_default().trim() {
            "" | "none" => AuthMode::None,
            "static" => AuthMode::Static,
            "proxy" => AuthMode::Proxy,
            other => anyhow::bail!("unsupported AUTH_MODE: {other:?}"),
        };

        if let Ok(secret) = std::env::var("AUTH_SESSION_SECRET") {
            if !secret.is_empty() {
                config.session_secret = secret.into_bytes();
            }
        } else if config.mode == AuthMode::Static {
            warn!("AUTH_SESSION_SECRET not set; sessions will not survive a restart");
        }

        if let Ok(ttl) = std::env::var("AUTH_SESSION_TTL_SECONDS") {
            config.session_ttl = Duration::from_secs(ttl.parse()?);
        }
        config.cookie_secure = std::env::var("AUTH_COOKIE_SECURE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        if let Ok(raw) = std::env::var("AUTH_USERS") {
            config.users = parse_static_users(&raw)?;
        }
        if config.mode == AuthMode::Static && config.users.is_empty() {
            anyhow::bail!("AUTH_MODE=static requires AUTH_USERS");
        }

        if let Ok(raw) = std::env::var("AUTH_TRUSTED_PROXY_CIDRS") {
            for item in split_csv(&raw) {
                let cidr = Cidr::parse(&item)
                    .ok_or_else(|| anyhow::anyhow!("invalid CIDR in AUTH_TRUSTED_PROXY_CIDRS: {item:?}"))?;
                config.trusted_proxy_cidrs.push(cidr);
            }
        }
        if let Ok(raw) = std::env::var("AUTH_PROXY_ADMIN_GROUPS") {
            config.proxy_admin_groups = split_csv(&raw);
        }
        if let Ok(raw) = std::env::var("AUTH_PROXY_ANALYST_GROUPS") {
            config.proxy_analyst_groups = split_csv(&raw);
        }

        Ok(config)
    }

    pub fn enabled(&self) -> bool {
        self.mode != AuthMode::None
    }
}

/// Parse `username:hash[:roles]` entries separated by commas; roles within
/// an entry are `|`-separated. Everyone gets at least viewer.
pub fn parse_static_users(raw: &str) -> anyhow::Result<HashMap<String, StaticUser>> {
    let mut users = HashMap::new();
    for entry in split_csv(raw) {
        let mut parts = entry.splitn(3, ':');
        let username = parts.next().unwrap_or("").trim().to_string();
        let password_hash = parts.next().unwrap_or("").trim().to_string();
        if username.is_empty() || password_hash.is_empty() {
            anyhow::bail!("AUTH_USERS entries must be username:hash[:roles]");
        }

        let mut roles = BTreeSet::from([Role::Viewer]);
        if let Some(roles_raw) = parts.next() {
            for role in roles_raw.replace(';', "|").split('|') {
                if role.trim().is_empty() {
                    continue;
                }
                let role = Role::parse(role)
                    .ok_or_else(|| anyhow::anyhow!("unsupported role: {role:?}"))?;
                roles.insert(role);
            }
        }

        users.insert(
            username.clone(),
            StaticUser {
                username,
                password_hash,
                roles,
            },
        );
    }
    Ok(users)
}

/// Verify a password against `plain$...` or
/// `pbkdf2_sha256$<iter>$<salt_b64>$<digest_b64>` in constant time.
pub fn verify_password(password: &str, password_hash: &str) -> anyhow::Result<bool> {
    if let Some(expected) = password_hash.strip_prefix("plain$") {
        return Ok(password.as_bytes().ct_eq(expected.as_bytes()).into());
    }

    if let Some(rest) = password_hash.strip_prefix("pbkdf2_sha256$") {
        let parts: Vec<&str> = rest.split('$').collect();
        let [iterations, salt_b64, digest_b64] = parts.as_slice() else {
            anyhow::bail!("invalid pbkdf2_sha256 hash format");
        };
        let iterations: u32 = iterations.parse()?;
        let salt = URL_SAFE_NO_PAD.decode(salt_b64)?;
        let expected = URL_SAFE_NO_PAD.decode(digest_b64)?;

        let mut derived = vec![0u8; expected.len()];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut derived);
        return Ok(derived.ct_eq(&expected).into());
    }

    anyhow::bail!("unsupported password hash scheme")
}

#[derive(Serialize, Deserialize)]
struct SessionPayload {
    sub: String,
    roles: Vec<Role>,
    iat: i64,
    exp: i64,
}

/// Signed session token: `base64url(payload).base64url(hmac_sha256)`.
pub fn create_session_token(config: &AuthConfig, user: &UserIdentity) -> String {
    let now = Utc::now().timestamp();
    let payload = SessionPayload {
        sub: user.username.clone(),
        roles: user.roles.iter().copied().collect(),
        iat: now,
        exp: now + config.session_ttl.as_secs() as i64,
    };
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap_or_default());
    let signature = sign(&config.session_secret, body.as_bytes());
    format!("{body}.{}", URL_SAFE_NO_PAD.encode(signature))
}

fn sign(secret: &[u8], body: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length; this cannot fail.
        Err(_) => return Vec::new(),
    };
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Verify a session token; `None` on any tampering or expiry.
pub fn verify_session_token(config: &AuthConfig, token: &str) -> Option<UserIdentity> {
    let (body, signature_b64) = token.split_once('.')?;

    let mut mac = HmacSha256::new_from_slice(&config.session_secret).ok()?;
    mac.update(body.as_bytes());
    let provided = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
    mac.verify_slice(&provided).ok()?;

    let payload: SessionPayload =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(body).ok()?).ok()?;
    if Utc::now().timestamp() >= payload.exp {
        return None;
    }

    let mut roles: BTreeSet<Role> = payload.roles.into_iter().collect();
    roles.insert(Role::Viewer);
    Some(UserIdentity {
        username: payload.sub,
        roles,
        source: "static",
    })
}

fn cookie_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(axum::http::header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn client_addr(parts: &Parts) -> Option<IpAddr> {
    parts
        .extensions
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

fn proxy_identity(config: &AuthConfig, parts: &Parts) -> Option<UserIdentity> {
    let addr = client_addr(parts)?;
    if !config.trusted_proxy_cidrs.iter().any(|c| c.contains(addr)) {
        return None;
    }

    let username = ["x-forwarded-user", "x-auth-request-user", "x-auth-request-email"]
        .iter()
        .find_map(|h| parts.headers.get(*h))
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())?
        .to_string();

    let groups: BTreeSet<String> = ["x-forwarded-groups", "x-auth-request-groups"]
        .iter()
        .find_map(|h| parts.headers.get(*h))
        .and_then(|v| v.to_str().ok())
        .map(|v| split_csv(v).into_iter().collect())
        .unwrap_or_default();

    let mut roles = BTreeSet::from([Role::Viewer]);
    if config.proxy_analyst_groups.iter().any(|g| groups.contains(g)) {
        roles.insert(Role::Analyst);
    }
    if config.proxy_admin_groups.iter().any(|g| groups.contains(g)) {
        roles.insert(Role::Analyst);
        roles.insert(Role::Admin);
    }

    Some(UserIdentity {
        username,
        roles,
        source: "proxy",
    })
}

/// Current user per the configured mode; `None` when anonymous.
pub fn current_user(config: &AuthConfig, parts: &Parts) -> Option<UserIdentity> {
    match config.mode {
        AuthMode::None => None,
        AuthMode::Proxy => proxy_identity(config, parts),
        AuthMode::Static => {
            let token = cookie_value(parts, SESSION_COOKIE_NAME)?;
            verify_session_token(config, token)
        }
    }
}

/// Extractor: any authenticated user (or anonymous when auth is disabled).
pub struct RequireAuth(pub Option<UserIdentity>);

/// Extractor: analyst role required when auth is enabled.
pub struct RequireAnalyst(pub Option<UserIdentity>);

#[axum::async_trait]
impl FromRequestParts<ApiState> for RequireAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        if !state.auth.enabled() {
            return Ok(Self(None));
        }
        match current_user(&state.auth, parts) {
            Some(user) => Ok(Self(Some(user))),
            None => Err(ApiError::unauthorized("Not authenticated")),
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<ApiState> for RequireAnalyst {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ApiState,
    ) -> Result<Self, Self::Rejection> {
        let RequireAuth(user) = RequireAuth::from_request_parts(parts, state).await?;
        if let Some(user) = &user {
            if !user.has_role(Role::Analyst) {
                return Err(ApiError::forbidden("Forbidden"));
            }
        }
        Ok(Self(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, roles: &[Role]) -> UserIdentity {
        UserIdentity {
            username: name.to_string(),
            roles: roles.iter().copied().collect(),
            source: "static",
        }
    }

    #[test]
    fn test_session_token_roundtrip() {
        let config = AuthConfig::default();
        let user = identity("alice", &[Role::Viewer, Role::Analyst]);
        let token = create_session_token(&config, &user);
        let verified = verify_session_token(&config, &token).unwrap();
        assert_eq!(verified.username, "alice");
        assert!(verified.has_role(Role::Analyst));
        assert!(!verified.has_role(Role::Admin));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let config = AuthConfig::default();
        let user = identity("alice", &[Role::Viewer]);
        let token = create_session_token(&config, &user);

        let mut tampered = token.clone();
        tampered.replace_range(0..2, "zz");
        assert!(verify_session_token(&config, &tampered).is_none());

        // Body swapped but signature kept.
        let (_, signature) = token.split_once('.').unwrap();
        let forged_body = URL_SAFE_NO_PAD
            .encode(r#"{"sub":"mallory","roles":["admin"],"iat":0,"exp":99999999999}"#);
        assert!(
            verify_session_token(&config, &format!("{forged_body}.{signature}")).is_none()
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = AuthConfig::default();
        let user = identity("alice", &[Role::Viewer]);
        let token = create_session_token(&config, &user);

        let other = AuthConfig::default(); // fresh ephemeral secret
        assert!(verify_session_token(&other, &token).is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut config = AuthConfig::default();
        config.session_ttl = Duration::from_secs(0);
        let user = identity("alice", &[Role::Viewer]);
        let token = create_session_token(&config, &user);
        assert!(verify_session_token(&config, &token).is_none());
    }

    #[test]
    fn test_verify_plain_password() {
        assert!(verify_password("hunter2", "plain$hunter2").unwrap());
        assert!(!verify_password("hunter3", "plain$hunter2").unwrap());
    }

    #[test]
    fn test_verify_pbkdf2_password() {
        // Hash of "s3cret" with 1000 iterations and a fixed salt.
        let salt = b"0123456789abcdef";
        let mut digest = [0u8; 32];
        pbkdf2_hmac::<Sha256>(b"s3cret", salt, 1000, &mut digest);
        let hash = format!(
            "pbkdf2_sha256$1000${}${}",
            URL_SAFE_NO_PAD.encode(salt),
            URL_SAFE_NO_PAD.encode(digest)
        );

        assert!(verify_password("s3cret", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_unsupported_hash_scheme_errors() {
        assert!(verify_password("x", "bcrypt$whatever").is_err());
    }

    #[test]
    fn test_parse_static_users() {
        let users =
            parse_static_users("alice:plain$a:analyst|admin, bob:plain$b").unwrap();
        assert_eq!(users.len(), 2);
        assert!(users["alice"].roles.contains(&Role::Admin));
        assert!(users["alice"].roles.contains(&Role::Viewer));
        assert_eq!(users["bob"].roles.len(), 1);
    }

    #[test]
    fn test_cidr_contains() {
        let cidr = Cidr::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains("10.1.2.3".parse().unwrap()));
        assert!(!cidr.contains("11.0.0.1".parse().unwrap()));

        let single = Cidr::parse("192.0.2.7").unwrap();
        assert!(single.contains("192.0.2.7".parse().unwrap()));
        assert!(!single.contains("192.0.2.8".parse().unwrap()));

        let v6 = Cidr::parse("fd00::/8").unwrap();
        assert!(v6.contains("fd00::1".parse().unwrap()));
        assert!(!v6.contains("fe80::1".parse().unwrap()));
        assert!(!v6.contains("10.0.0.1".parse().unwrap()));
    }
}
