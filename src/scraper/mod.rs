pub mod cleaner;
pub mod executor;
pub mod http_client;
pub mod normalizer;
pub mod parsers;
pub mod token;

pub use self::executor::QueryExecutor;
pub use self::http_client::SessionContext;
pub use self::token::TokenProvider;
