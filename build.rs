//! Build script for steep

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

/// Entry point to the build script
///
/// Emits the `arm_abi` and `arm_architecture` cfgs the context switch code
/// is selected with. Host builds get no Arm cfgs and use the host switch.
fn main() {
    arm_targets::process();
}

// End of File
