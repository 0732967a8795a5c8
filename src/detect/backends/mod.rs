mod stub;

pub use stub::StubTracker;
