//! Temporary script files
//!
//! Rendered script content is written to a uniquely named file in the scratch
//! directory and run through the language interpreter. The file is deleted
//! when the [`MaterializedScript`] is dropped, whichever way execution ends.

use std::io::Write;
use std::path::Path;

use tempfile::TempPath;

use crate::errors::EngineError;
use crate::scripts::language::ScriptLanguage;
use crate::utils::shell_quote;

pub const SCRIPT_FILE_PREFIX: &str = "flowdeck_script_";

#[derive(Debug)]
pub struct MaterializedScript {
    path: TempPath,
    language: ScriptLanguage,
}

impl MaterializedScript {
    /// Write `content` (with a shebang added if missing) to a fresh file in `dir`
    pub fn create(dir: &Path, language: ScriptLanguage, content: &str) -> Result<Self, EngineError> {
        std::fs::create_dir_all(dir)?;

        let mut file = tempfile::Builder::new()
            .prefix(SCRIPT_FILE_PREFIX)
            .suffix(&format!(".{}", language.extension()))
            .tempfile_in(dir)?;
        file.write_all(language.with_shebang(content).as_bytes())?;
        file.flush()?;

        let path = file.into_temp_path();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }

        Ok(Self { path, language })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn language(&self) -> ScriptLanguage {
        self.language
    }

    /// `<interpreter> <path>`
    pub fn command_line(&self) -> String {
        format!(
            "{} {}",
            self.language.interpreter(),
            shell_quote(&self.path.to_string_lossy())
        )
    }

    /// Dry-run syntax check for this file
    pub fn syntax_check_line(&self) -> String {
        self.language
            .syntax_check_command(&self.path.to_string_lossy())
    }
}
