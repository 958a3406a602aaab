pub mod codec;
pub mod detect;
pub mod inspect;
pub mod paths;
pub mod plausibility;
pub mod repair;
pub mod sample;

pub use codec::{count_replacements, Codec, CodecError, DecodeMode, REPLACEMENT};
pub use detect::{ChardetDetector, Detection, Detector};
pub use inspect::{
    canonical, read_sample, EncodingPolicy, FileRecord, ProblemKind, Verdict, DEFAULT_DETECTION,
    DEFAULT_SUPPORTED,
};
pub use paths::{is_txt, sanitize_component, timestamp, unique_path};
pub use plausibility::{PlausibilityPolicy, Readable};
pub use repair::{
    create_backup, decode_with_fallbacks, repair_file, strategy_chain, write_verified, Decoded,
    RepairError, RepairOutcome, Strategy,
};
pub use sample::{sample_file, strip_markers, SampleSpec};
