// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use apm_manifest::body::PackagesBody;
use apm_package::{AptBackend, ChangePlan, PackageService};

use crate::Error;

pub(crate) fn execute<B: AptBackend>(body: &PackagesBody, packages: &PackageService<B>) -> Result<serde_json::Value, Error> {
    // `upgrade` calls the same facade operation as `update` (spec.md §9 open
    // question 3, resolved against the source's own behavior).
    if body.update || body.upgrade {
        packages.update()?;
    }

    let plan = if body.install.is_empty() && body.remove.is_empty() {
        ChangePlan::default()
    } else {
        let ops = apm_package::combine_ops(&body.install, &body.remove);
        packages.combine_install_remove_packages(&ops, false, false)?
    };

    Ok(serde_json::json!({
        "installed": plan.new_installed,
        "removed": plan.removed,
        "upgraded": plan.upgraded,
    }))
}
