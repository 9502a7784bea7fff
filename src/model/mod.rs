mod backend_msg;
mod data;
mod flow_control;
mod terminal;
mod timeout;
mod u32iter;

pub use backend_msg::ExitSignal;
pub(crate) use backend_msg::{BackendResp, BackendRqst};
pub(crate) use data::Data;
pub(crate) use flow_control::FlowControl;
pub use terminal::{TerminalSize, TerminalSizeType};
pub(crate) use timeout::Timeout;
pub(crate) use u32iter::U32Iter;
