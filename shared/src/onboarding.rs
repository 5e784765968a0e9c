//! Lawyer onboarding application and its client-side validation.

use serde::{Deserialize, Serialize};

use crate::FieldError;

pub const MAX_NAME_LENGTH: usize = 120;
pub const MAX_BIO_LENGTH: usize = 2_000;
pub const MAX_JURISDICTIONS: usize = 20;
pub const MAX_SPECIALTIES: usize = 10;
pub const MAX_YEARS_EXPERIENCE: u32 = 70;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct LawyerApplication {
    pub full_name: String,
    pub email: String,
    pub bar_number: String,
    pub jurisdictions: Vec<String>,
    pub specialties: Vec<String>,
    pub years_experience: u32,
    #[serde(default)]
    pub bio: Option<String>,
}

impl LawyerApplication {
    /// Returns every field problem at once so the form can mark them together.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        let name = self.full_name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("full_name", "Full name is required"));
        } else if name.chars().count() > MAX_NAME_LENGTH {
            errors.push(FieldError::new(
                "full_name",
                format!("Full name must be at most {MAX_NAME_LENGTH} characters"),
            ));
        }

        if !is_plausible_email(self.email.trim()) {
            errors.push(FieldError::new("email", "Enter a valid email address"));
        }

        let bar = self.bar_number.trim();
        if bar.is_empty() {
            errors.push(FieldError::new("bar_number", "Bar number is required"));
        } else if bar.len() < 4
            || bar.len() > 20
            || !bar.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            errors.push(FieldError::new(
                "bar_number",
                "Bar number must be 4-20 letters, digits or dashes",
            ));
        }

        let jurisdictions = non_blank(&self.jurisdictions);
        if jurisdictions == 0 {
            errors.push(FieldError::new(
                "jurisdictions",
                "Select at least one jurisdiction",
            ));
        } else if jurisdictions > MAX_JURISDICTIONS {
            errors.push(FieldError::new(
                "jurisdictions",
                format!("Select at most {MAX_JURISDICTIONS} jurisdictions"),
            ));
        }

        let specialties = non_blank(&self.specialties);
        if specialties == 0 {
            errors.push(FieldError::new("specialties", "Select at least one specialty"));
        } else if specialties > MAX_SPECIALTIES {
            errors.push(FieldError::new(
                "specialties",
                format!("Select at most {MAX_SPECIALTIES} specialties"),
            ));
        }

        if self.years_experience > MAX_YEARS_EXPERIENCE {
            errors.push(FieldError::new(
                "years_experience",
                "Years of experience looks incorrect",
            ));
        }

        if let Some(bio) = &self.bio {
            if bio.chars().count() > MAX_BIO_LENGTH {
                errors.push(FieldError::new(
                    "bio",
                    format!("Bio must be at most {MAX_BIO_LENGTH} characters"),
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn non_blank(items: &[String]) -> usize {
    items.iter().filter(|s| !s.trim().is_empty()).count()
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
