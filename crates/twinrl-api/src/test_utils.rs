use crate::builders::{
    exploration::ExplorationConfig, learning_module::LearningModuleType, ppo::PpoBuilder,
    td3::Td3Builder,
};
use twinrl_agents::{ppo::PpoParams, td3::Td3Params};
use twinrl_core::off_policy_algorithm::OffPolicySchedule;

/// A TD3 setup small enough for a test run: a few short epochs with learning starting after the
/// first cycle.
pub fn quick_td3(n_epochs: usize) -> Td3Builder {
    Td3Builder {
        params: Td3Params {
            min_buffer_size: 100,
            buffer_batch_size: 32,
            ..Default::default()
        },
        policy_layers: vec![32, 32],
        qf_layers: vec![32, 32],
        replay_capacity: 10_000,
        goal_dim: 0,
        exploration: ExplorationConfig::Gaussian {
            max_sigma: 0.3,
            min_sigma: 0.1,
            decay_period: 10_000,
        },
        schedule: OffPolicySchedule {
            n_epochs,
            n_epoch_cycles: 4,
            env_steps_per_cycle: 100,
            n_train_steps: 20,
        },
    }
}

pub fn quick_ppo(total_steps: usize) -> PpoBuilder {
    PpoBuilder {
        params: PpoParams {
            sample_size: 32,
            max_epochs: 4,
            ..Default::default()
        },
        learning_module: LearningModuleType::Paralell {
            value_layers: vec![32, 32],
            learning_rate: 1e-3,
            vf_coeff: 0.5,
            max_grad_norm: Some(0.5),
        },
        n_steps: 256,
        n_envs: 2,
        total_steps,
        ..Default::default()
    }
}

pub fn assert_all_finite(name: &str, values: &[f32]) {
    for (i, v) in values.iter().enumerate() {
        assert!(v.is_finite(), "{name}[{i}] is {v}");
    }
}

/// True when the mean of the last `window` values is larger than the mean of the first `window`.
pub fn improved(values: &[f32], window: usize) -> bool {
    if values.len() < 2 * window || window == 0 {
        return false;
    }
    let mean = |slice: &[f32]| slice.iter().sum::<f32>() / slice.len() as f32;
    mean(&values[values.len() - window..]) > mean(&values[..window])
}
