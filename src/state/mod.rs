//! State transition events and the pub-sub dispatcher that fans them out

pub mod dispatcher;
pub mod events;
