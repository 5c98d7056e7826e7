pub mod scripted;
pub mod synthetic;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::{ModelProbe, ScriptedPoseModel};
pub use synthetic::SyntheticPoseModel;

#[cfg(feature = "backend-tract")]
pub use tract::TractPoseModel;
