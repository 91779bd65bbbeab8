pub mod emotion;
pub mod live_comment;
pub mod message;
pub mod screenplay;
