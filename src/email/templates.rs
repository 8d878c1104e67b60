//! HTML bodies for verification and password-reset mail.

pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

pub enum EmailTemplate<'a> {
    VerifyEmail {
        username: &'a str,
        code: &'a str,
        url: &'a str,
    },
    ResetPassword {
        username: &'a str,
        url: &'a str,
    },
}

/// Minimal escaping for values interpolated into markup.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn code_boxes(code: &str) -> String {
    code.chars()
        .map(|c| {
            format!(
                r#"<span style="display:inline-block;width:40px;height:48px;line-height:48px;margin:0 4px;border:1px solid #d0d7de;border-radius:8px;background:#f6f8fa;font-size:24px;font-weight:700;font-family:monospace;">{}</span>"#,
                escape(&c.to_string())
            )
        })
        .collect()
}

fn button(text: &str, url: &str) -> String {
    format!(
        r#"<a href="{}" style="display:inline-block;padding:12px 28px;border-radius:8px;background:#2563eb;color:#ffffff;text-decoration:none;font-weight:600;">{}</a>"#,
        escape(url),
        escape(text)
    )
}

fn layout(company: &str, title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body style="margin:0;padding:24px;background:#f3f4f6;font-family:Arial,Helvetica,sans-serif;color:#111827;">
<table role="presentation" width="100%" cellspacing="0" cellpadding="0">
<tr><td align="center">
<table role="presentation" width="560" style="background:#ffffff;border-radius:12px;padding:32px;">
<tr><td>
<h1 style="font-size:22px;margin:0 0 16px;">{title}</h1>
{body}
<p style="margin-top:32px;font-size:12px;color:#6b7280;">&copy; {company}</p>
</td></tr>
</table>
</td></tr>
</table>
</body>
</html>"#,
        title = escape(title),
        body = body,
        company = escape(company),
    )
}

impl EmailTemplate<'_> {
    pub fn render(&self, company: &str) -> RenderedEmail {
        match self {
            EmailTemplate::VerifyEmail {
                username,
                code,
                url,
            } => {
                let body = format!(
                    r#"<p>Hi {user},</p>
<p>Use the code below to verify your email address. It expires in 24 hours.</p>
<div style="text-align:center;margin:24px 0;">{boxes}</div>
<p style="text-align:center;">{button}</p>
<p style="font-size:13px;color:#6b7280;">If you did not create an account, you can ignore this email.</p>"#,
                    user = escape(username),
                    boxes = code_boxes(code),
                    button = button("Verify Email", url),
                );
                RenderedEmail {
                    subject: "Verify Your Email".to_string(),
                    html: layout(company, "Verify Your Email", &body),
                }
            }
            EmailTemplate::ResetPassword { username, url } => {
                let body = format!(
                    r#"<p>Hi {user},</p>
<p>We received a request to reset your password. The link below is valid for one hour and can be used once.</p>
<p style="text-align:center;margin:24px 0;">{button}</p>
<p style="font-size:13px;color:#6b7280;word-break:break-all;">{url}</p>
<p style="font-size:13px;color:#6b7280;">If you did not request a reset, no action is needed.</p>"#,
                    user = escape(username),
                    button = button("Reset Password", url),
                    url = escape(url),
                );
                RenderedEmail {
                    subject: "Reset Your Password".to_string(),
                    html: layout(company, "Reset Your Password", &body),
                }
            }
        }
    }
}
