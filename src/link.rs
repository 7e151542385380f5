// Inter-stage linking of a compiled vertex/fragment pair. Each fragment input is
// resolved against the vertex outputs by semantic slot, producing the per-varying
// routing table the rasterizer setup consumes: the vertex register feeding each
// varying, its component count and parallel-assembly attribute word, and per-component
// usage tags. Point coordinates are fragment inputs with no vertex counterpart; they
// claim a varying slot with synthesized X/Y usage tags and report the component
// offset the point sprite unit needs. A fragment input whose semantic has no vertex
// output is a link error.

use crate::compile::CompiledShader;
use crate::core::{CompileError, CompileResult};
use crate::ir::Semantic;

/// Per-component usage tag of a varying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VaryingCompUse {
    #[default]
    Unused,
    Used,
    PointCoordX,
    PointCoordY,
}

/// One linked varying.
#[derive(Debug, Clone, Default)]
pub struct Varying {
    /// Vertex output register feeding this varying; 0 for point coord.
    pub reg: u32,
    pub num_components: u8,
    /// Parallel-assembly attribute word (flat-shade bypass configuration).
    pub pa_attributes: u32,
    pub use_comp: [VaryingCompUse; 4],
}

/// Result of linking a vertex/fragment pair.
#[derive(Debug, Clone, Default)]
pub struct LinkInfo {
    pub varyings: Vec<Varying>,
    pub num_varyings: usize,
    /// Component offset of the point coordinate, when the fragment stage
    /// reads one.
    pub pcoord_varying_comp_ofs: Option<u32>,
}

fn vs_output_reg(vs: &CompiledShader, semantic: Semantic) -> Option<u32> {
    vs.outfile.iter().find(|io| io.semantic == semantic).map(|io| io.reg)
}

/// Resolve every fragment input against the vertex outputs.
pub fn link_shaders(vs: &CompiledShader, fs: &CompiledShader) -> CompileResult<LinkInfo> {
    let mut info = LinkInfo::default();
    info.varyings.resize(fs.infile.len(), Varying::default());
    let mut comp_ofs = 0u32;

    for fsio in &fs.infile {
        // Fragment inputs sit one register past the position register.
        debug_assert!(fsio.reg > 0);
        let idx = (fsio.reg - 1) as usize;
        if fsio.reg as usize > info.num_varyings {
            info.num_varyings = fsio.reg as usize;
        }
        if idx >= info.varyings.len() {
            info.varyings.resize(idx + 1, Varying::default());
        }
        let varying = &mut info.varyings[idx];
        varying.num_components = fsio.ncomp;
        // Texture coordinates and friends bypass flat shading.
        varying.pa_attributes = 0x2f1;

        if fsio.semantic == Semantic::PointCoord {
            varying.use_comp[0] = VaryingCompUse::PointCoordX;
            varying.use_comp[1] = VaryingCompUse::PointCoordY;
            info.pcoord_varying_comp_ofs = Some(comp_ofs);
        } else {
            let Some(reg) = vs_output_reg(vs, fsio.semantic) else {
                return Err(CompileError::LinkError {
                    reason: format!(
                        "fragment input {} has no matching vertex output",
                        fsio.semantic
                    ),
                });
            };
            varying.reg = reg;
        }
        comp_ofs += varying.num_components as u32;
    }

    Ok(info)
}
