pub mod stage;
pub mod verifier;

pub use stage::{authorize, AuthStage};
pub use verifier::{OidcTokenVerifier, TokenVerifier};
