//! Where the acting user comes from

use actix_web::http::header::HeaderMap;
use uuid::Uuid;

use crate::models::{Actor, Role};

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

/// Resolves the authenticated actor for the current call.
///
/// Token issuance and session storage live behind this trait; `None` means
/// no authenticated identity is present.
pub trait IdentityProvider {
    fn current_actor(&self) -> Option<Actor>;
}

/// Always yields the same actor
#[derive(Debug, Clone, Copy)]
pub struct StaticIdentity(pub Actor);

impl IdentityProvider for StaticIdentity {
    fn current_actor(&self) -> Option<Actor> {
        Some(self.0)
    }
}

/// Reads the identity the auth gateway forwards in request headers
pub struct GatewayHeaders<'a> {
    headers: &'a HeaderMap,
}

impl<'a> GatewayHeaders<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self { headers }
    }

    fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl IdentityProvider for GatewayHeaders<'_> {
    fn current_actor(&self) -> Option<Actor> {
        let id = self.header(USER_ID_HEADER)?.trim().parse::<Uuid>().ok()?;
        let role = match self.header(USER_ROLE_HEADER)?.parse::<Role>() {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(user_id = %id, error = %e, "Rejected identity headers");
                return None;
            }
        };
        Some(Actor::new(id, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_gateway_headers() {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let map = headers(&[("x-user-id", id_str.as_str()), ("x-user-role", "staff")]);
        assert_eq!(
            GatewayHeaders::new(&map).current_actor(),
            Some(Actor::staff(id))
        );
    }

    #[test]
    fn test_missing_or_bad_headers() {
        let id = Uuid::new_v4().to_string();
        assert!(GatewayHeaders::new(&headers(&[("x-user-id", id.as_str())]))
            .current_actor()
            .is_none());
        assert!(
            GatewayHeaders::new(&headers(&[("x-user-id", "nope"), ("x-user-role", "ADMIN")]))
                .current_actor()
                .is_none()
        );
        assert!(
            GatewayHeaders::new(&headers(&[("x-user-id", id.as_str()), ("x-user-role", "mayor")]))
                .current_actor()
                .is_none()
        );
    }

    #[test]
    fn test_static_identity() {
        let actor = Actor::admin(Uuid::new_v4());
        assert_eq!(StaticIdentity(actor).current_actor(), Some(actor));
    }
}
