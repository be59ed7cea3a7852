// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod download;
mod filename;

pub use download::{DownloadOptions, download_audio};
pub use filename::{audio_extension, suggested_filename};
