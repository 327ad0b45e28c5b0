//! Handler patch attachment and invocation accounting

pub mod injector;
pub mod matcher;
pub mod validator;

pub use injector::{HandlerInjector, InjectionRecord, InjectorStats};
pub use matcher::request_matches;
pub use validator::PatchValidator;
