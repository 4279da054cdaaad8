//! Platform login detection

/// Who the platform CLI is logged in as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    LoggedIn { user: String },
    LoggedOut { detail: String },
}

impl Session {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, Session::LoggedIn { .. })
    }
}

/// Ask `oc whoami` for the current user
pub fn check_session(oc: &str) -> Session {
    let output = duct::cmd(oc, ["whoami"])
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run();

    match output {
        Ok(out) if out.status.success() => parse_whoami(&String::from_utf8_lossy(&out.stdout)),
        Ok(out) => Session::LoggedOut {
            detail: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        },
        Err(e) => Session::LoggedOut {
            detail: format!("could not run {oc}: {e}"),
        },
    }
}

fn parse_whoami(stdout: &str) -> Session {
    match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(user) => Session::LoggedIn {
            user: user.to_string(),
        },
        None => Session::LoggedOut {
            detail: "empty user name".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whoami() {
        assert_eq!(
            parse_whoami("kube:admin\n"),
            Session::LoggedIn {
                user: "kube:admin".to_string()
            }
        );
        assert!(!parse_whoami("\n").is_logged_in());
    }

    #[test]
    fn test_missing_binary_is_logged_out() {
        assert!(!check_session("estap-no-such-oc").is_logged_in());
    }
}
