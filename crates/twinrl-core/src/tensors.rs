use candle_core::Tensor;
use derive_more::{Deref, DerefMut, Display};

#[derive(Deref, DerefMut, Debug, Display)]
pub struct Logp(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct ValuesPred(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct PolicyLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct ValueLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct LogpDiff(pub Tensor);

/// Summed loss of both critics, what the twin critics are minimized against.
#[derive(Deref, DerefMut, Debug, Display)]
pub struct QvalLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct ActionLoss(pub Tensor);

/// Clipped TD(0) targets of a sampled batch, shape `[B, 1]`. Never carries gradients.
#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct Targets(pub Tensor);
