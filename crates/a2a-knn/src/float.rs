//! A trait for the floating-point element types this crate operates over.

/// A trait for types that can be used as the element type of vector, neighbor,
/// and distance matrices.
///
/// The element type is a compile-time choice between 32-bit and 64-bit IEEE
/// floats (§6): every input and output of a single call shares one `Float`
/// type. We provide a blanket implementation for all types that satisfy the
/// trait bounds, which in practice means `f32` and `f64`.
pub trait Float:
    ndarray::LinalgScalar
    + num_traits::Float
    + num_traits::FromPrimitive
    + Send
    + Sync
    + std::fmt::Debug
    + std::iter::Sum
    + 'static
{
}

/// Blanket implementation of [`Float`] for all types that satisfy the trait bounds.
impl<T> Float for T where
    T: ndarray::LinalgScalar
        + num_traits::Float
        + num_traits::FromPrimitive
        + Send
        + Sync
        + std::fmt::Debug
        + std::iter::Sum
        + 'static
{
}
