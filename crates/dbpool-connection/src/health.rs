//! Health check functionality for pooled connections
//!
//! # Example
//!
//! ```ignore
//! use dbpool_connection::health::ConnectionValidator;
//!
//! let validator = ConnectionValidator::from_config(&config);
//! let latency = validator.check(&*connection).await?;
//! println!("Validated in {:?}", latency);
//! ```

mod validator;


pub use validator::ConnectionValidator;
