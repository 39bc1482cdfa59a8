// Periodic processing contract for components owned by the drive loop

/// A component advanced once per fixed-period cycle by its owner
///
/// Nothing registers itself anywhere: the owner holds each `Tickable`
/// directly and calls `tick` in a fixed order, one cycle at a time.
pub trait Tickable {
    /// Data consumed by one cycle
    type Input;
    /// Data produced by one cycle
    type Output;

    /// Run one cycle to completion
    fn tick(&mut self, input: &Self::Input) -> Self::Output;
}
