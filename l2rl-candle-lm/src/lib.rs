pub mod clip_grad;
pub mod distributions;
pub mod network;
pub mod optimizer;
pub mod tensors;
pub mod thread_safe_sequential;
