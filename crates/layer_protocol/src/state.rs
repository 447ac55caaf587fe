use crate::DrawPass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    Less,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub color_write: bool,
    pub depth_write: bool,
    pub depth_func: DepthFunc,
    pub blend: bool,
}

impl RasterState {
    pub const OCCLUDER: Self = Self {
        color_write: false,
        depth_write: true,
        depth_func: DepthFunc::Less,
        blend: false,
    };

    pub const OPAQUE: Self = Self {
        color_write: true,
        depth_write: true,
        depth_func: DepthFunc::Less,
        blend: false,
    };

    pub const TRANSPARENT: Self = Self {
        color_write: true,
        depth_write: false,
        depth_func: DepthFunc::Less,
        blend: true,
    };

    /// Stencil-only writes: no color, no depth test or write.
    pub const STENCIL_ONLY: Self = Self {
        color_write: false,
        depth_write: false,
        depth_func: DepthFunc::Always,
        blend: false,
    };

    pub const fn clip_region(write_depth: bool) -> Self {
        Self {
            color_write: false,
            depth_write: write_depth,
            depth_func: DepthFunc::Less,
            blend: false,
        }
    }

    /// Depth reset after a depth-writing clip region is popped.
    pub const DEPTH_RESET: Self = Self {
        color_write: false,
        depth_write: true,
        depth_func: DepthFunc::Always,
        blend: false,
    };

    pub const fn with_depth_func(mut self, depth_func: DepthFunc) -> Self {
        self.depth_func = depth_func;
        self
    }

    pub const fn for_pass(pass: DrawPass) -> Self {
        match pass {
            DrawPass::ClipOutside => Self::OCCLUDER,
            DrawPass::Opaque => Self::OPAQUE,
            DrawPass::OpaqueOverdraw => Self::OPAQUE.with_depth_func(DepthFunc::Always),
            DrawPass::ClipInside => Self::STENCIL_ONLY,
            DrawPass::Transparent => Self::TRANSPARENT,
            DrawPass::TransparentOverdraw => Self::TRANSPARENT.with_depth_func(DepthFunc::Always),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilFunc {
    Always,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Incr,
    Decr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub func: StencilFunc,
    pub reference: u32,
    pub pass_op: StencilOp,
}

impl StencilState {
    pub const DISABLED: Self = Self {
        func: StencilFunc::Always,
        reference: 0,
        pass_op: StencilOp::Keep,
    };

    /// Only pixels whose stencil value equals `reference` pass.
    pub const fn test(reference: u32) -> Self {
        Self {
            func: StencilFunc::Equal,
            reference,
            pass_op: StencilOp::Keep,
        }
    }

    pub const fn increment(reference: u32) -> Self {
        Self {
            func: StencilFunc::Equal,
            reference,
            pass_op: StencilOp::Incr,
        }
    }

    pub const fn decrement(reference: u32) -> Self {
        Self {
            func: StencilFunc::Equal,
            reference,
            pass_op: StencilOp::Decr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overdraw_passes_only_change_depth_test() {
        let opaque = RasterState::for_pass(DrawPass::Opaque);
        let overdraw = RasterState::for_pass(DrawPass::OpaqueOverdraw);
        assert_eq!(overdraw.depth_func, DepthFunc::Always);
        assert_eq!(overdraw.with_depth_func(DepthFunc::Less), opaque);

        let transparent = RasterState::for_pass(DrawPass::Transparent);
        assert!(transparent.blend);
        assert!(!transparent.depth_write);
    }

    #[test]
    fn occluders_write_depth_without_color() {
        let occluder = RasterState::for_pass(DrawPass::ClipOutside);
        assert!(!occluder.color_write);
        assert!(occluder.depth_write);
        assert_eq!(occluder.depth_func, DepthFunc::Less);
    }
}
