pub mod ppo;
pub mod td3;
