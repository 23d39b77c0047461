use chromiumoxide::page::Page;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ApplicantProfile;
use crate::error::{DispatchError, Result};

/// Label texts and button captions of a site's contact dialog.
#[derive(Debug, Clone, Serialize)]
pub struct FormLayout {
    pub open_button: String,
    pub submit_button: String,
    pub message_placeholder: String,
}

impl FormLayout {
    pub fn immonet() -> Self {
        Self {
            open_button: "Kontaktieren".to_string(),
            submit_button: "Kontaktanfrage senden".to_string(),
            message_placeholder: "Nachricht".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct FormPayload<'a> {
    salutation: &'a str,
    fields: Vec<(&'static str, &'a str)>,
    message: &'a str,
    layout: &'a FormLayout,
}

/// Script that clicks the contact button. Evaluates to `true` if found.
pub fn generate_open_form_script(layout: &FormLayout) -> Result<String> {
    let caption = serde_json::to_string(&layout.open_button).map_err(DispatchError::from)?;
    Ok(format!(
        r#"(() => {{
    const caption = {caption};
    const button = Array.from(document.querySelectorAll('button'))
        .find(b => b.textContent && b.textContent.includes(caption));
    if (!button) return false;
    button.click();
    return true;
}})()"#
    ))
}

/// Script that fills the labelled inputs, the message and submits.
/// Evaluates to the number of filled fields, or -1 if submit was not found.
pub fn generate_fill_form_script(profile: &ApplicantProfile, layout: &FormLayout) -> Result<String> {
    let payload = FormPayload {
        salutation: &profile.salutation,
        fields: vec![
            ("Vorname", profile.first_name.as_str()),
            ("Nachname", profile.last_name.as_str()),
            ("E-Mail", profile.email.as_str()),
            ("Telefon", profile.phone.as_str()),
            ("Straße / Hausnummer", profile.street.as_str()),
            ("PLZ", profile.postal_code.as_str()),
            ("Ort", profile.city.as_str()),
        ],
        message: &profile.message,
        layout,
    };
    let payload = serde_json::to_string(&payload).map_err(DispatchError::from)?;

    Ok(format!(
        r#"(() => {{
    const data = {payload};
    const labels = Array.from(document.querySelectorAll('label'));
    const setValue = (el, value) => {{
        el.focus();
        el.value = value;
        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
    }};
    let filled = 0;
    const salutation = labels.find(l => l.textContent.trim() === data.salutation);
    if (salutation) {{ salutation.click(); filled++; }}
    for (const [label, value] of data.fields) {{
        if (!value) continue;
        const match = labels.find(l => l.textContent.trim() === label);
        if (!match) continue;
        const input = match.control
            || (match.nextElementSibling && match.nextElementSibling.tagName === 'INPUT' ? match.nextElementSibling : null);
        if (!input) continue;
        setValue(input, value);
        filled++;
    }}
    if (data.message) {{
        const area = Array.from(document.querySelectorAll('textarea'))
            .find(t => (t.placeholder || '').includes(data.layout.message_placeholder));
        if (area) {{ setValue(area, data.message); filled++; }}
    }}
    const submit = Array.from(document.querySelectorAll('button'))
        .find(b => b.textContent && b.textContent.includes(data.layout.submit_button));
    if (!submit) return -1;
    submit.click();
    return filled;
}})()"#
    ))
}

/// Drives a site's contact dialog on an already opened page.
pub struct ContactFormFiller {
    profile: ApplicantProfile,
    layout: FormLayout,
    settle: Duration,
}

impl ContactFormFiller {
    pub fn new(profile: ApplicantProfile, layout: FormLayout, settle: Duration) -> Self {
        Self {
            profile,
            layout,
            settle,
        }
    }

    /// Returns `Ok(false)` when the dialog is not there or cannot be submitted.
    pub async fn submit(&self, page: &Page) -> Result<bool> {
        tokio::time::sleep(self.settle).await;

        let open_script = generate_open_form_script(&self.layout)?;
        let opened: bool = page
            .evaluate(open_script.as_str())
            .await
            .map_err(|e| DispatchError::Browser(format!("Failed to open contact form: {}", e)))?
            .into_value()
            .map_err(|e| DispatchError::Browser(format!("Unexpected script result: {}", e)))?;
        if !opened {
            warn!("Contact button '{}' not found", self.layout.open_button);
            return Ok(false);
        }

        tokio::time::sleep(self.settle / 2).await;

        let fill_script = generate_fill_form_script(&self.profile, &self.layout)?;
        let filled: i64 = page
            .evaluate(fill_script.as_str())
            .await
            .map_err(|e| DispatchError::Browser(format!("Failed to fill contact form: {}", e)))?
            .into_value()
            .map_err(|e| DispatchError::Browser(format!("Unexpected script result: {}", e)))?;
        if filled < 0 {
            warn!("Submit button '{}' not found", self.layout.submit_button);
            return Ok(false);
        }

        debug!("Filled {} contact form fields and submitted", filled);
        // give the site time to accept the request before the page closes
        tokio::time::sleep(self.settle).await;
        Ok(true)
    }
}
