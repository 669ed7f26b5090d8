//! # leadcast-oauth
//!
//! `OAuth2` authentication library for the leadcast campaign service.
//!
//! Background jobs act on a user's mailbox and lead spreadsheet long after
//! the user has walked away, so everything here is built around offline
//! access: the Authorization Code Flow (with PKCE) obtains a refresh token
//! once, and [`OAuthClient::refresh_token`] mints fresh access tokens from
//! it for the rest of the session's life.
//!
//! ## Quick Start
//!
//! ```ignore
//! use leadcast_oauth::{AuthorizationCodeFlow, OAuthClient, Provider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::google()?;
//!     let client = OAuthClient::new("your_client_id", provider)
//!         .with_client_secret("your_secret")
//!         .with_redirect_uri("http://localhost:8080/oauth/callback");
//!
//!     let flow = AuthorizationCodeFlow::new(client).with_pkce();
//!
//!     // Send the operator here to grant consent.
//!     let auth_url = flow.authorization_url(None, Some("random_state"))?;
//!     println!("Visit: {auth_url}");
//!
//!     // The callback handler exchanges the code for a token.
//!     let token = flow.exchange_code("code_from_redirect", None).await?;
//!     println!("Access token: {}", token.access_token);
//!     Ok(())
//! }
//! ```
//!
//! ### Token Refresh
//!
//! ```ignore
//! if token.is_expired() {
//!     let new_token = client.refresh_token(&token).await?;
//! }
//! ```
//!
//! ## Provider Support
//!
//! - **Google** - Gmail send/read plus Sheets access
//! - **Microsoft** - Graph mail plus Files access
//! - **Custom** - Configure any `OAuth2` provider

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod flow;
pub mod provider;
pub mod token;

pub use error::{Error, Result};
pub use flow::{AuthorizationCodeFlow, OAuthClient, PkceChallenge};
pub use provider::Provider;
pub use token::Token;
