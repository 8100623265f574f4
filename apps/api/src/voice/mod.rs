pub mod dictation;
pub mod interview;
pub mod live;
