pub mod annotate;
pub mod answer;
pub mod evaluate;
pub mod random;
pub mod search;
pub mod session;
pub mod status;
pub mod topics;
