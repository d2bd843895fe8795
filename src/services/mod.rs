pub mod cursor;
pub mod drive;
pub mod local;
pub mod oauth;
pub mod storage;
pub mod sync;
