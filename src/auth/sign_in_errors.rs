/// What the sign-in page shows for an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignInErrorInfo {
    pub message: &'static str,
    pub show_verification_info: bool,
}

const fn info(message: &'static str) -> SignInErrorInfo {
    SignInErrorInfo {
        message,
        show_verification_info: false,
    }
}

/// Resolve a sign-in error code. For `CredentialsSignin` the preflight
/// code (passed as `detail`) refines the message.
pub fn resolve_sign_in_error(code: Option<&str>, detail: Option<&str>) -> SignInErrorInfo {
    match code {
        Some("CredentialsSignin") => {
            match detail.unwrap_or_default().to_ascii_uppercase().as_str() {
                "VERIFICATION_REQUIRED" => SignInErrorInfo {
                    message: "Please verify your email before signing in",
                    show_verification_info: true,
                },
                "DATABASE_ERROR" => info("Database connection failed. Please try again later."),
                _ => info("Invalid email/username or password"),
            }
        }
        Some("OAuthError") | Some("OAuthSignin") => {
            info("Authentication service error. Please try again.")
        }
        Some("AccessDenied") => info("Access denied. Please check your credentials"),
        _ => info("An error occurred during sign in"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_detail_refines_message() {
        let unverified = resolve_sign_in_error(Some("CredentialsSignin"), Some("verification_required"));
        assert!(unverified.show_verification_info);
        assert_eq!(unverified.message, "Please verify your email before signing in");
        assert_eq!(
            resolve_sign_in_error(Some("CredentialsSignin"), None).message,
            "Invalid email/username or password"
        );
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(
            resolve_sign_in_error(Some("Weird"), None).message,
            "An error occurred during sign in"
        );
        assert_eq!(
            resolve_sign_in_error(Some("AccessDenied"), None).message,
            "Access denied. Please check your credentials"
        );
    }
}
