//! Configuration for the router.
//!
//! Settings come from environment variables (with `.env` loaded by `dotenvy`)
//! or from the `with_*` builders for programmatic use.

pub(crate) mod helpers;
mod router;

pub use self::helpers::{optional_env, parse_optional_env};
pub use self::router::{
    DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENROUTER_BASE_URL, RouterConfig,
};
