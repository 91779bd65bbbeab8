pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod live;
pub mod ports;
pub mod relay;
pub mod screenplay;
pub mod splitter;
pub mod studio;
pub mod tag;
