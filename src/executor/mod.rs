mod channel;
mod dag;

pub use channel::WatchChannel;
pub use dag::WorkflowExecutor;
