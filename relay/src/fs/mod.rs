mod storage;
mod write_buffer;

pub use storage::{FsStorage, Storage};
pub use write_buffer::WriteBuffer;
