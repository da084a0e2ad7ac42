// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

diesel::table! {
    image_history (id) {
        id -> Integer,
        image_name -> Text,
        config -> Text,
        config_hash -> Text,
        image_date -> Text,
    }
}

diesel::table! {
    host_image_packages (name, version) {
        name -> Text,
        version -> Text,
    }
}
