//! Launch configuration policy.

/// Workgroup and dispatch dimensions for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub workgroup_size: (u32, u32),
    pub workgroups: (u32, u32),
}

impl LaunchConfig {
    /// One `tile_width x tile_width` workgroup per output tile, enough tiles to
    /// cover `width` in both dimensions.
    pub fn derive(tile_width: u32, width: u32) -> Self {
        debug_assert!(tile_width > 0, "tile width must be positive");
        let grid = width.div_ceil(tile_width);
        Self {
            workgroup_size: (tile_width, tile_width),
            workgroups: (grid, grid),
        }
    }

    pub fn invocations_per_workgroup(&self) -> u32 {
        self.workgroup_size.0 * self.workgroup_size.1
    }

    /// Total invocations dispatched, including padding lanes past the matrix edge.
    pub fn total_invocations(&self) -> u64 {
        u64::from(self.invocations_per_workgroup())
            * u64::from(self.workgroups.0)
            * u64::from(self.workgroups.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_needs_no_padding() {
        let config = LaunchConfig::derive(16, 64);
        assert_eq!(config.workgroup_size, (16, 16));
        assert_eq!(config.workgroups, (4, 4));
        assert_eq!(config.total_invocations(), 64 * 64);
    }

    #[test]
    fn ragged_width_rounds_up() {
        let config = LaunchConfig::derive(8, 33);
        assert_eq!(config.workgroups, (5, 5));
        assert!(config.total_invocations() > 33 * 33);
    }

    #[test]
    #[should_panic]
    fn zero_tile_width_is_rejected() {
        LaunchConfig::derive(0, 16);
    }

    #[test]
    fn tile_wider_than_matrix_uses_one_workgroup() {
        let config = LaunchConfig::derive(32, 5);
        assert_eq!(config.workgroups, (1, 1));
        assert_eq!(config.invocations_per_workgroup(), 1024);
    }
}
