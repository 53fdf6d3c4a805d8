pub mod auth; // bearer credential parsing and authentication middleware
pub mod clock; // wall-clock sources
pub mod cohort; // cohort assignment
pub mod config; // gateway config file
pub mod counter_store; // shared counter storage
pub mod endpoints; // API endpoints
pub mod error; // error handling
pub mod gateway_util; // app state and router construction
pub mod metrics; // in-process request counters
pub mod observability; // log setup
pub mod rate_limit; // fixed-window rate limiting
pub mod visits; // lifetime visit accounting
