//! Supported script languages

use serde::{Deserialize, Serialize};

/// Closed set of interpreters a script can target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    #[default]
    Bash,
    Sh,
    Python,
    Php,
    Node,
    Ruby,
}

impl ScriptLanguage {
    pub const ALL: [ScriptLanguage; 6] = [
        ScriptLanguage::Bash,
        ScriptLanguage::Sh,
        ScriptLanguage::Python,
        ScriptLanguage::Php,
        ScriptLanguage::Node,
        ScriptLanguage::Ruby,
    ];

    /// Interpreter binary used to run a materialized script
    pub fn interpreter(&self) -> &'static str {
        match self {
            ScriptLanguage::Bash => "bash",
            ScriptLanguage::Sh => "sh",
            ScriptLanguage::Python => "python3",
            ScriptLanguage::Php => "php",
            ScriptLanguage::Node => "node",
            ScriptLanguage::Ruby => "ruby",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ScriptLanguage::Bash | ScriptLanguage::Sh => "sh",
            ScriptLanguage::Python => "py",
            ScriptLanguage::Php => "php",
            ScriptLanguage::Node => "js",
            ScriptLanguage::Ruby => "rb",
        }
    }

    pub fn shebang(&self) -> &'static str {
        match self {
            ScriptLanguage::Bash => "#!/bin/bash",
            ScriptLanguage::Sh => "#!/bin/sh",
            ScriptLanguage::Python => "#!/usr/bin/env python3",
            ScriptLanguage::Php => "#!/usr/bin/env php",
            ScriptLanguage::Node => "#!/usr/bin/env node",
            ScriptLanguage::Ruby => "#!/usr/bin/env ruby",
        }
    }

    /// Dry-run syntax check for a script at `path`, without executing it
    pub fn syntax_check_command(&self, path: &str) -> String {
        let path = crate::utils::shell_quote(path);
        match self {
            ScriptLanguage::Bash => format!("bash -n {}", path),
            ScriptLanguage::Sh => format!("sh -n {}", path),
            ScriptLanguage::Python => format!(
                "python3 -c 'import ast,sys; ast.parse(open(sys.argv[1]).read(), sys.argv[1])' {}",
                path
            ),
            ScriptLanguage::Php => format!("php -l {}", path),
            ScriptLanguage::Node => format!("node --check {}", path),
            ScriptLanguage::Ruby => format!("ruby -c {}", path),
        }
    }

    /// Content with the language shebang prepended when missing
    pub fn with_shebang(&self, content: &str) -> String {
        if content.starts_with("#!") {
            content.to_string()
        } else {
            format!("{}\n\n{}", self.shebang(), content)
        }
    }
}

impl std::fmt::Display for ScriptLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScriptLanguage::Bash => "bash",
            ScriptLanguage::Sh => "sh",
            ScriptLanguage::Python => "python",
            ScriptLanguage::Php => "php",
            ScriptLanguage::Node => "node",
            ScriptLanguage::Ruby => "ruby",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for ScriptLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bash" => Ok(ScriptLanguage::Bash),
            "sh" => Ok(ScriptLanguage::Sh),
            "python" | "python3" | "py" => Ok(ScriptLanguage::Python),
            "php" => Ok(ScriptLanguage::Php),
            "node" | "nodejs" | "js" => Ok(ScriptLanguage::Node),
            "ruby" | "rb" => Ok(ScriptLanguage::Ruby),
            _ => Err(format!("Unsupported script language: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_mappings() {
        assert_eq!(ScriptLanguage::Python.interpreter(), "python3");
        assert_eq!(ScriptLanguage::Node.extension(), "js");
        assert_eq!(ScriptLanguage::Sh.extension(), "sh");
        assert_eq!("rb".parse::<ScriptLanguage>().unwrap(), ScriptLanguage::Ruby);
        assert!("cobol".parse::<ScriptLanguage>().is_err());
    }

    #[test]
    fn test_shebang_is_only_added_when_missing() {
        let with = ScriptLanguage::Bash.with_shebang("#!/usr/bin/env bash\necho hi");
        assert_eq!(with, "#!/usr/bin/env bash\necho hi");

        let without = ScriptLanguage::Bash.with_shebang("echo hi");
        assert!(without.starts_with("#!/bin/bash\n"));
        assert!(without.ends_with("echo hi"));
    }

    #[test]
    fn test_syntax_check_quotes_the_path() {
        let cmd = ScriptLanguage::Php.syntax_check_command("/tmp/my script.php");
        assert_eq!(cmd, "php -l '/tmp/my script.php'");
    }
}
