pub mod peer_limit;

pub use peer_limit::peer_limit_middleware;
