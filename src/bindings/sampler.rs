// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Static samplers compiled into a root signature.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerType {
    ///The sampler shall use normalized coordinates, and will do interpolation for mipmapping.
    Mipmapped,
    ///Nearest texel, no filtering.
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Wrap,
    Clamp,
    Mirror,
}
