pub mod completion;
pub mod handle;
pub mod invoker;
pub mod template;

mod latch;
