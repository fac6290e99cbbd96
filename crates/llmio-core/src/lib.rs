//! Request-routing core: auth, resolution, weighted dispatch, stream tee.

mod auth;
mod client;
mod dispatch;
mod error;
mod principal;
mod resolver;
mod tee;

pub use auth::{AuthService, generate_auth_key};
pub use client::ClientCache;
pub use dispatch::{ChatOp, Dispatcher, Outbound, RequestEnvelope, RequestMeta};
pub use error::DispatchError;
pub use principal::Principal;
pub use resolver::{ResolvedRoute, RouteChoice, resolve};
