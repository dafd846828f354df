//! Stage Script Preparation
//!
//! A prepared script is the strict-mode preamble, the helper library and a
//! trailer that evaluates the stage script named by `$1`. The stage script
//! path travels as a shell argument and is never spliced into the text.

use std::path::{Path, PathBuf};

/// Strict mode: stop at the first failing command, fold stderr into stdout.
pub const PREAMBLE: &str = "#!/bin/bash\nset -e\nexec 2>&1\n";

/// Reads the stage script given as `$1` and evaluates it in this shell.
pub const TRAILER: &str = "target_script=$(<\"$1\")\neval \"$target_script\"\n";

/// Helper functions every stage script can call.
///
/// Arguments are quoted, so paths may contain spaces and glob patterns are
/// passed through literally: `copy_to_package "lib/*" usr/lib` copies a
/// directory named `lib/*`, not every entry of `lib`. A `target` ending in
/// `/` is a directory the file is copied into.
pub const BUILTIN_HELPERS: &str = r#"
function validate_checksum {
	# Get the file path and checksum from the arguments
	file_path="$1"
	expected_checksum="$2"

	# Calculate the actual checksum of the file
	actual_checksum="$(sha256sum "$file_path" | awk '{print $1}')"

	# Compare the actual and expected checksums
	if [[ "$actual_checksum" == "$expected_checksum" ]]; then
		echo "Checksum validation successful"
		return 0
	else
		echo "Checksum validation failed"
		rm "$file_path"
		exit 1
	fi
}

function install_to_package {
	src_file="$1"
	target="$2"

	if [[ "$target" == */ ]]; then
		mkdir -p "program/$target"
	else
		mkdir -p "$(dirname "program/$target")"
	fi
	cp -p "$SRC/$src_file" "program/$target"
}

function copy_to_package {
	src_dir="$1"
	target="$2"

	mkdir -p "program/$target"
	cp -r "$SRC/$src_dir" "program/$target"
}
"#;

/// Shell function library injected ahead of every stage script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperLibrary {
    source: String,
}

impl HelperLibrary {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_HELPERS)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Default for HelperLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Script text plus the stage script it evaluates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedScript {
    pub text: String,
    pub script_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptPreparer {
    helpers: HelperLibrary,
}

impl ScriptPreparer {
    pub fn new(helpers: HelperLibrary) -> Self {
        Self { helpers }
    }

    pub fn helpers(&self) -> &HelperLibrary {
        &self.helpers
    }

    pub fn prepare(&self, stage0_scripts_dir: &Path, stage_name: &str) -> PreparedScript {
        let mut text = String::with_capacity(PREAMBLE.len() + self.helpers.source.len() + TRAILER.len() + 2);
        text.push_str(PREAMBLE);
        text.push_str(&self.helpers.source);
        text.push('\n');
        text.push_str(TRAILER);

        PreparedScript {
            text,
            script_path: stage0_scripts_dir.join(stage_name),
        }
    }
}
