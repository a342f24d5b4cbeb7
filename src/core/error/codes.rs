use super::ErrorCode;

pub fn all_codes() -> &'static [ErrorCode] {
    &[
        ErrorCode::ConfigMissingKey,
        ErrorCode::ConfigInvalidJson,
        ErrorCode::ConfigInvalidValue,
        ErrorCode::ValidationInvalidArgument,
        ErrorCode::ComposeFileNotFound,
        ErrorCode::ComposeImageLineMissing,
        ErrorCode::SshIdentityFileNotFound,
        ErrorCode::DeployCommandFailed,
        ErrorCode::DeployHealthCheckFailed,
        ErrorCode::InternalIoError,
        ErrorCode::InternalJsonError,
        ErrorCode::InternalUnexpected,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn code_strings_are_unique_and_dotted() {
        let mut seen = HashSet::new();
        for code in all_codes() {
            assert!(code.as_str().contains('.'), "{}", code.as_str());
            assert!(seen.insert(code.as_str()), "duplicate {}", code.as_str());
        }
    }
}
