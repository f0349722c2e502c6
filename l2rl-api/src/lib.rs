// builders + task loop + the environments and logs around it
pub mod builders;
pub mod envs;
pub mod hooks;
pub mod play;
pub mod task_loop;
pub mod utils;

#[cfg(feature = "test-utils")]
pub mod test_utils;
