// This module defines the immutable hardware capability descriptor consumed by every
// stage of the pipeline. HwSpecs carries the generation level, feature flags, and the
// hard resource budgets (temporary registers, uniform slots, directly addressable
// instructions) together with the chip constants feeding the vertex/fragment load
// balancing formula. The descriptor is plain data: the driver layer constructs one per
// probed device and shares it read-only across concurrent shader compiles. Preset
// constructors cover the two generation families the encoder supports and are what the
// usccdump tool maps its --gen switch onto.

use bitflags::bitflags;

bitflags! {
    /// Generation-specific feature flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HwFeatures: u32 {
        /// Dedicated two-component dot product unit.
        const DOT2 = 1 << 0;
        /// Revised transcendental unit producing two-component results.
        const NEW_TRANSCENDENTALS = 1 << 1;
        /// Texture instructions accept separate coordinate and LOD sources.
        const MULTI_SRC_TEX = 1 << 2;
    }
}

/// Hardware capability descriptor.
///
/// Shared read-only by all compiles targeting the same device. The budgets
/// are hard limits: exceeding `max_temps` or `max_uniform_slots` fails the
/// compile, while exceeding `max_instructions` only flags the shader as
/// needing instruction-cache residency.
#[derive(Debug, Clone)]
pub struct HwSpecs {
    /// Generation level; 5 and up use the unified encoding layout.
    pub gen_level: u8,
    pub features: HwFeatures,
    /// Number of 4-component temporary registers.
    pub max_temps: u32,
    /// Number of 4-word uniform slots.
    pub max_uniform_slots: u32,
    /// Directly addressable instruction count (icache threshold).
    pub max_instructions: u32,
    /// Vertex-stage sampler indices start past the fragment samplers.
    pub vertex_sampler_offset: u32,
    pub vertex_output_buffer_size: u32,
    pub vertex_cache_size: u32,
    pub shader_core_count: u32,
}

impl HwSpecs {
    /// Whether the unified (gen 5+) instruction word layout applies.
    pub fn unified_encoding(&self) -> bool {
        self.gen_level >= 5
    }

    /// Older cores route every constant operand of an instruction through a
    /// single uniform port.
    pub fn single_uniform_port(&self) -> bool {
        self.gen_level < 5
    }

    /// Preset descriptor for the legacy generation family.
    pub fn legacy() -> Self {
        HwSpecs {
            gen_level: 2,
            features: HwFeatures::DOT2,
            max_temps: 64,
            max_uniform_slots: 168,
            max_instructions: 512,
            vertex_sampler_offset: 8,
            vertex_output_buffer_size: 512,
            vertex_cache_size: 16,
            shader_core_count: 1,
        }
    }

    /// Preset descriptor for the unified generation family.
    pub fn unified() -> Self {
        HwSpecs {
            gen_level: 5,
            features: HwFeatures::DOT2
                | HwFeatures::NEW_TRANSCENDENTALS
                | HwFeatures::MULTI_SRC_TEX,
            max_temps: 64,
            max_uniform_slots: 168,
            max_instructions: 1024,
            vertex_sampler_offset: 16,
            vertex_output_buffer_size: 1024,
            vertex_cache_size: 16,
            shader_core_count: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_selection_follows_generation() {
        assert!(!HwSpecs::legacy().unified_encoding());
        assert!(HwSpecs::unified().unified_encoding());
        assert!(HwSpecs::legacy().single_uniform_port());
        assert!(!HwSpecs::unified().single_uniform_port());
    }
}
