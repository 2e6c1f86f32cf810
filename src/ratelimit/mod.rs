//! Fixed-window rate limiting: policy, identity extraction, key derivation
//! and the decision engine.

mod clock;
mod handlers;
mod identity;
mod key;
mod limiter;
mod quota;

pub use clock::{Clock, ManualClock, SystemClock};
pub use handlers::{
    emit_headers, DefaultDeniedHandler, DefaultErrorHandler, DeniedHandler, ErrorHandler,
    INTERNAL_ERROR_BODY, TOO_MANY_REQUESTS_BODY, X_RATE_LIMIT_LIMIT, X_RATE_LIMIT_REMAINING,
    X_RATE_LIMIT_RESET,
};
pub use identity::{
    ContextIdentity, HeaderIdentity, IdentityError, IdentityResolver, IpIdentity, RemoteAddr,
    RequestContext, FORWARDED_FOR_HEADER,
};
pub use key::{
    check_delimiter, KeyDeriver, PrefixedKey, DEFAULT_KEY_DELIMITER, DEFAULT_KEY_PREFIX,
};
pub use limiter::{
    Admission, Decision, LimitError, Limiter, LimiterBuilder, DEFAULT_STORE_TIMEOUT,
};
pub use quota::Quota;
