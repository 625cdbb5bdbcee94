pub mod env;
pub mod exploration;
pub mod learning_module;
pub mod ppo;
pub mod td3;
