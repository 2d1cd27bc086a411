#![doc = include_str!("../README.md")]

// Declare modules
pub mod chimerax;
pub mod confidence;
pub mod diagnostics;
pub mod errors;
pub mod histogram;
pub mod modify;
pub mod mrc;
pub mod pipeline;
pub mod radial_mask;
pub mod scale;
pub mod solvent;
pub mod spectral;
pub mod volume;

// Re-export main structures
pub use crate::confidence::{
    Confidence,
    estimate_confidence,
};
pub use crate::diagnostics::DiagnosticsSink;
pub use crate::modify::{
    ModificationMode,
    Modified,
    modify,
};
pub use crate::mrc::{
    MrcHeader,
    MrcMap,
    read_mrc,
    write_mrc,
};
pub use crate::pipeline::{
    OccupyConfig,
    PipelineOutput,
    ScaleMode,
    run,
};
pub use crate::radial_mask::{
    RadialMask,
    radial_mask,
};
pub use crate::scale::{
    NormalizationMode,
    ScaleField,
    TilePolicy,
    TileSettings,
};
pub use crate::solvent::{
    SolventComponents,
    SolventFit,
    SolventLimits,
    SolventModelParams,
    fit_solvent_to_histogram,
    suppress,
};
pub use crate::volume::Volume;

// Re-export errors
pub use crate::errors::{
    OccupyError,
    Result,
};
