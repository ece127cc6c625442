//! Admin token: a single shared secret loaded from (or generated into) a
//! file on disk, checked against the fixed username `"vrr"` on every
//! admin request via HTTP Basic auth.
//!
//! Grounded on the upstream `pkg/router/http.go` (`SetToken`/`saveToken`)
//! and `pkg/api/utils.go` (`GenString`): a 32-character alphanumeric
//! token, first character forced to a letter, written with mode 0600.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use rand::Rng;

pub const ADMIN_USER: &str = "vrr";
const TOKEN_LEN: usize = 32;
const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Loads the admin token from `path`, generating and persisting a fresh
/// one if the file is absent or empty.
pub fn load_or_generate_token(path: &Path) -> std::io::Result<String> {
    if let Ok(contents) = std::fs::read_to_string(path) {
        let token = contents.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let token = generate_token();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(token.as_bytes())?;
    Ok(token)
}

fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(TOKEN_LEN);
    out.push(ALPHABET[10 + rng.gen_range(0..26)] as char);
    for _ in 1..TOKEN_LEN {
        out.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
    }
    out
}

/// Axum middleware rejecting any request whose Basic-auth credentials
/// don't match `(ADMIN_USER, token)`.
pub async fn require_basic_auth(
    State(token): State<Arc<String>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(parse_basic)
        .is_some_and(|(user, pass)| user == ADMIN_USER && pass == *token);

    if authorized {
        return next.run(request).await;
    }

    let mut response = (StatusCode::UNAUTHORIZED, "Authorization required").into_response();
    response.headers_mut().insert(
        axum::http::header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"openvrr\""),
    );
    response
}

fn parse_basic(header: &HeaderValue) -> Option<(String, String)> {
    let value = header.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_is_32_chars_starting_with_a_letter() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().next().unwrap().is_ascii_lowercase());
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn parse_basic_decodes_user_and_password() {
        let header = HeaderValue::from_str(&format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("vrr:s3cret")
        ))
        .unwrap();
        let (user, pass) = parse_basic(&header).unwrap();
        assert_eq!(user, "vrr");
        assert_eq!(pass, "s3cret");
    }

    #[test]
    fn parse_basic_rejects_non_basic_scheme() {
        let header = HeaderValue::from_static("Bearer abcdef");
        assert!(parse_basic(&header).is_none());
    }

    #[test]
    fn load_or_generate_token_persists_with_restricted_permissions() {
        let dir = std::env::temp_dir().join(format!("vrr-auth-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("token");

        let first = load_or_generate_token(&path).unwrap();
        let second = load_or_generate_token(&path).unwrap();
        assert_eq!(first, second, "a second load must reuse the persisted token");

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        std::fs::remove_dir_all(&dir).ok();
    }
}
