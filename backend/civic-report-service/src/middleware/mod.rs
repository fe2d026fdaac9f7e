use actix_web::{error::ErrorUnauthorized, Error, FromRequest, HttpRequest};
use futures::future::{ready, Ready};

use crate::models::Actor;
use crate::services::identity::{GatewayHeaders, IdentityProvider};

/// Handlers take `Actor` as an argument to require an authenticated caller.
impl FromRequest for Actor {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        ready(
            GatewayHeaders::new(req.headers())
                .current_actor()
                .ok_or_else(|| ErrorUnauthorized("Missing or invalid identity headers")),
        )
    }
}
