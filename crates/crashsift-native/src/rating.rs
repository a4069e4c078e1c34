//! Rating the quality of a debugger backtrace.
//!
//! A backtrace is only as useful as the symbols that went into it. Each frame is rated by what
//! the debugger managed to resolve for it, and the frames are combined into a star rating from
//! 0 to 4 where the innermost frames weigh the most.

use std::fmt;

/// What a single backtrace frame resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameRating {
    /// `#0 0x0000dead in ?? ()`
    MissingEverything = 0,
    /// `#0 0x0000dead in ?? () from /usr/lib/libfoobar.so.4`
    MissingFunction = 1,
    /// `#0 0x0000dead in foobar()`
    MissingLibrary = 2,
    /// `#0 0x0000dead in FooBar::FooBar () from /usr/lib/libfoobar.so.4`
    MissingSourceFile = 3,
    /// `#0 0x0000dead in FooBar::crash (this=0x0) at /home/user/foobar.cpp:204`
    Good = 4,
}

impl FrameRating {
    pub fn score(self) -> u64 {
        self as u64
    }
}

/// Rates the text of a single frame.
pub fn rate_frame(frame: &str) -> FrameRating {
    let function = frame.contains(" in ") && !frame.contains(" in ??");
    let library = frame.contains(" from ");
    let source_file = frame.contains(" at ");

    match (function, library, source_file) {
        (true, _, true) => FrameRating::Good,
        (true, true, false) => FrameRating::MissingSourceFile,
        (true, false, false) => FrameRating::MissingLibrary,
        (false, true, _) => FrameRating::MissingFunction,
        (false, false, _) => FrameRating::MissingEverything,
    }
}

/// The star rating of a whole backtrace, from 0 to 4.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rating(u8);

impl Rating {
    pub const MAX: Rating = Rating(4);

    pub fn stars(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Weighted sums of a backtrace's frame ratings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RatingSums {
    /// `Σ rating × weight`
    pub achieved: u64,
    /// `Σ Good × weight`
    pub possible: u64,
}

impl RatingSums {
    /// Maps the ratio of achieved to possible score onto stars.
    ///
    /// Thresholds are at 80%, 60%, 40% and 20%. A backtrace without frames rates 0.
    pub fn rating(self) -> Rating {
        let Self { achieved, possible } = self;
        if possible == 0 {
            return Rating(0);
        }
        let stars = [(8, 4), (6, 3), (4, 2), (2, 1)]
            .into_iter()
            .find(|(tenths, _)| achieved * 10 >= possible * tenths)
            .map_or(0, |(_, stars)| stars);
        Rating(stars)
    }
}

/// Computes the weighted frame ratings of `backtrace`.
///
/// Frames are separated by `#`; whatever precedes the first `#` is not a frame. The last frame
/// in the text gets weight 1 and every frame above it one more, so the top of the stack
/// dominates.
pub fn rating_sums(backtrace: &str) -> RatingSums {
    let frames: Vec<_> = backtrace.split('#').skip(1).collect();
    frames
        .into_iter()
        .rev()
        .zip(1u64..)
        .fold(RatingSums::default(), |mut sums, (frame, weight)| {
            sums.achieved += rate_frame(frame).score() * weight;
            sums.possible += FrameRating::Good.score() * weight;
            sums
        })
}

/// Rates `backtrace` from 0 to 4 stars.
pub fn rate_backtrace(backtrace: &str) -> Rating {
    rating_sums(backtrace).rating()
}
