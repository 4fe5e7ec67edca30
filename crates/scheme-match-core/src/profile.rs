use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::MatchError;

pub const MAX_AGE: u32 = 150;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    En,
    Hi,
    Mr,
    Ta,
}

impl Language {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Hi => "hi",
            Self::Mr => "mr",
            Self::Ta => "ta",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::En),
            "hi" => Some(Self::Hi),
            "mr" => Some(Self::Mr),
            "ta" => Some(Self::Ta),
            _ => None,
        }
    }
}

/// Profile as submitted by a form: every field may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfileInput {
    pub full_name: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub annual_income: Option<f64>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub occupation: Option<String>,
    pub family_size: Option<i64>,
    pub is_bpl: Option<bool>,
    pub has_disability: Option<bool>,
    pub preferred_language: Option<String>,
    pub caste_category: Option<String>,
    pub education_level: Option<String>,
    pub land_ownership: Option<f64>,
}

impl ProfileInput {
    /// Validate a submitted profile into an evaluable [`Profile`].
    ///
    /// # Errors
    /// Returns [`MatchError::Validation`] listing every missing required field,
    /// or the first out-of-range or unparseable value.
    pub fn into_profile(self) -> Result<Profile, MatchError> {
        let mut missing = Vec::new();
        if self.age.is_none() {
            missing.push("age");
        }
        if self.gender.is_none() {
            missing.push("gender");
        }
        if self.annual_income.is_none() {
            missing.push("annual_income");
        }
        if self.state.is_none() {
            missing.push("state");
        }
        if self.district.is_none() {
            missing.push("district");
        }
        if self.occupation.is_none() {
            missing.push("occupation");
        }
        if self.family_size.is_none() {
            missing.push("family_size");
        }
        if self.is_bpl.is_none() {
            missing.push("is_bpl");
        }
        if self.has_disability.is_none() {
            missing.push("has_disability");
        }
        if self.preferred_language.is_none() {
            missing.push("preferred_language");
        }
        if !missing.is_empty() {
            return Err(MatchError::Validation(format!(
                "profile is missing required fields: {}",
                missing.join(", ")
            )));
        }

        let (
            Some(age),
            Some(gender),
            Some(annual_income),
            Some(state),
            Some(district),
            Some(occupation),
            Some(family_size),
            Some(is_bpl),
            Some(has_disability),
            Some(preferred_language),
        ) = (
            self.age,
            self.gender,
            self.annual_income,
            self.state,
            self.district,
            self.occupation,
            self.family_size,
            self.is_bpl,
            self.has_disability,
            self.preferred_language,
        )
        else {
            return Err(MatchError::Internal("required field check fell through".to_string()));
        };

        if age < 0 {
            return Err(MatchError::Validation(format!("age MUST be >= 0, got {age}")));
        }
        if age > i64::from(MAX_AGE) {
            return Err(MatchError::Validation(format!("age MUST be <= {MAX_AGE}, got {age}")));
        }
        let age = u32::try_from(age)
            .map_err(|_| MatchError::Validation(format!("age is out of range: {age}")))?;
        if family_size < 1 {
            return Err(MatchError::Validation(format!(
                "family_size MUST be >= 1, got {family_size}"
            )));
        }
        let family_size = u32::try_from(family_size).map_err(|_| {
            MatchError::Validation(format!("family_size is out of range: {family_size}"))
        })?;
        let gender = Gender::parse(&gender).ok_or_else(|| {
            MatchError::Validation(format!(
                "gender MUST be one of male, female, other; got `{gender}`"
            ))
        })?;
        let preferred_language = Language::parse(&preferred_language).ok_or_else(|| {
            MatchError::Validation(format!(
                "preferred_language MUST be one of en, hi, mr, ta; got `{preferred_language}`"
            ))
        })?;

        let profile = Profile {
            full_name: trimmed_optional(self.full_name),
            age,
            gender,
            annual_income,
            state: state.trim().to_string(),
            district: district.trim().to_string(),
            occupation: occupation.trim().to_string(),
            family_size,
            is_bpl,
            has_disability,
            preferred_language,
            caste_category: trimmed_optional(self.caste_category),
            education_level: trimmed_optional(self.education_level),
            land_ownership: self.land_ownership,
        };
        profile.validate()?;
        Ok(profile)
    }
}

fn trimmed_optional(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

/// A validated citizen profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "ProfileInput")]
pub struct Profile {
    pub full_name: Option<String>,
    pub age: u32,
    pub gender: Gender,
    pub annual_income: f64,
    pub state: String,
    pub district: String,
    pub occupation: String,
    pub family_size: u32,
    pub is_bpl: bool,
    pub has_disability: bool,
    pub preferred_language: Language,
    pub caste_category: Option<String>,
    pub education_level: Option<String>,
    pub land_ownership: Option<f64>,
}

impl TryFrom<ProfileInput> for Profile {
    type Error = MatchError;

    fn try_from(value: ProfileInput) -> Result<Self, Self::Error> {
        value.into_profile()
    }
}

impl Profile {
    /// Check value ranges on an already-typed profile.
    ///
    /// # Errors
    /// Returns [`MatchError::Validation`] for out-of-range numbers or blank text fields.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.age > MAX_AGE {
            return Err(MatchError::Validation(format!(
                "age MUST be <= {MAX_AGE}, got {}",
                self.age
            )));
        }

        if self.family_size == 0 {
            return Err(MatchError::Validation("family_size MUST be >= 1, got 0".to_string()));
        }

        if !self.annual_income.is_finite() || self.annual_income < 0.0 {
            return Err(MatchError::Validation(
                "annual_income MUST be a finite, non-negative amount".to_string(),
            ));
        }

        if let Some(land) = self.land_ownership {
            if !land.is_finite() || land < 0.0 {
                return Err(MatchError::Validation(
                    "land_ownership MUST be a finite, non-negative area".to_string(),
                ));
            }
        }

        for (name, value) in
            [("state", &self.state), ("district", &self.district), ("occupation", &self.occupation)]
        {
            if value.trim().is_empty() {
                return Err(MatchError::Validation(format!("{name} MUST be non-empty")));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn value_of(&self, field: ProfileField) -> ProfileValue<'_> {
        match field {
            ProfileField::Age => ProfileValue::Number(f64::from(self.age)),
            ProfileField::Gender => ProfileValue::Text(self.gender.as_str()),
            ProfileField::AnnualIncome => ProfileValue::Number(self.annual_income),
            ProfileField::State => ProfileValue::Text(&self.state),
            ProfileField::District => ProfileValue::Text(&self.district),
            ProfileField::Occupation => ProfileValue::Text(&self.occupation),
            ProfileField::FamilySize => ProfileValue::Number(f64::from(self.family_size)),
            ProfileField::IsBpl => ProfileValue::Flag(self.is_bpl),
            ProfileField::HasDisability => ProfileValue::Flag(self.has_disability),
            ProfileField::PreferredLanguage => {
                ProfileValue::Text(self.preferred_language.as_str())
            }
            ProfileField::CasteCategory => {
                self.caste_category.as_deref().map_or(ProfileValue::Missing, ProfileValue::Text)
            }
            ProfileField::EducationLevel => {
                self.education_level.as_deref().map_or(ProfileValue::Missing, ProfileValue::Text)
            }
            ProfileField::LandOwnership => {
                self.land_ownership.map_or(ProfileValue::Missing, ProfileValue::Number)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ProfileField {
    Age,
    Gender,
    AnnualIncome,
    State,
    District,
    Occupation,
    FamilySize,
    IsBpl,
    HasDisability,
    PreferredLanguage,
    CasteCategory,
    EducationLevel,
    LandOwnership,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FieldKind {
    Numeric,
    Text,
    Flag,
}

impl ProfileField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Gender => "gender",
            Self::AnnualIncome => "annual_income",
            Self::State => "state",
            Self::District => "district",
            Self::Occupation => "occupation",
            Self::FamilySize => "family_size",
            Self::IsBpl => "is_bpl",
            Self::HasDisability => "has_disability",
            Self::PreferredLanguage => "preferred_language",
            Self::CasteCategory => "caste_category",
            Self::EducationLevel => "education_level",
            Self::LandOwnership => "land_ownership",
        }
    }

    /// Resolve a rule's field reference. Legacy short names are accepted.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "age" => Some(Self::Age),
            "gender" => Some(Self::Gender),
            "annual_income" | "income" => Some(Self::AnnualIncome),
            "state" => Some(Self::State),
            "district" => Some(Self::District),
            "occupation" => Some(Self::Occupation),
            "family_size" => Some(Self::FamilySize),
            "is_bpl" => Some(Self::IsBpl),
            "has_disability" => Some(Self::HasDisability),
            "preferred_language" => Some(Self::PreferredLanguage),
            "caste_category" | "caste" => Some(Self::CasteCategory),
            "education_level" | "education" => Some(Self::EducationLevel),
            "land_ownership" => Some(Self::LandOwnership),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(self) -> FieldKind {
        match self {
            Self::Age | Self::AnnualIncome | Self::FamilySize | Self::LandOwnership => {
                FieldKind::Numeric
            }
            Self::IsBpl | Self::HasDisability => FieldKind::Flag,
            Self::Gender
            | Self::State
            | Self::District
            | Self::Occupation
            | Self::PreferredLanguage
            | Self::CasteCategory
            | Self::EducationLevel => FieldKind::Text,
        }
    }
}

impl Display for ProfileField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfileValue<'a> {
    Number(f64),
    Text(&'a str),
    Flag(bool),
    /// Optional attribute the profile does not carry.
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_input() -> ProfileInput {
        ProfileInput {
            full_name: Some("Asha Devi".to_string()),
            age: Some(45),
            gender: Some("female".to_string()),
            annual_income: Some(50_000.0),
            state: Some("Maharashtra".to_string()),
            district: Some("Pune".to_string()),
            occupation: Some("farmer".to_string()),
            family_size: Some(4),
            is_bpl: Some(false),
            has_disability: Some(false),
            preferred_language: Some("mr".to_string()),
            caste_category: None,
            education_level: None,
            land_ownership: Some(1.5),
        }
    }

    fn expect_validation_error(input: ProfileInput, expected_substring: &str) {
        match input.into_profile() {
            Ok(profile) => panic!("expected validation error, got profile {profile:?}"),
            Err(MatchError::Validation(message)) => assert!(
                message.contains(expected_substring),
                "validation error `{message}` did not contain `{expected_substring}`"
            ),
            Err(other) => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn complete_input_becomes_profile() {
        let profile = match complete_input().into_profile() {
            Ok(profile) => profile,
            Err(err) => panic!("profile should validate: {err}"),
        };
        assert_eq!(profile.age, 45);
        assert_eq!(profile.gender, Gender::Female);
        assert_eq!(profile.preferred_language, Language::Mr);
        assert_eq!(profile.value_of(ProfileField::LandOwnership), ProfileValue::Number(1.5));
        assert_eq!(profile.value_of(ProfileField::CasteCategory), ProfileValue::Missing);
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let input = ProfileInput { age: None, occupation: None, ..complete_input() };
        expect_validation_error(input, "missing required fields: age, occupation");
    }

    #[test]
    fn empty_input_is_rejected_not_defaulted() {
        expect_validation_error(ProfileInput::default(), "preferred_language");
    }

    #[test]
    fn negative_age_is_rejected() {
        let input = ProfileInput { age: Some(-3), ..complete_input() };
        expect_validation_error(input, "age MUST be >= 0");
    }

    #[test]
    fn implausible_age_is_rejected() {
        let input = ProfileInput { age: Some(400), ..complete_input() };
        expect_validation_error(input, "age MUST be <= 150");
    }

    #[test]
    fn age_beyond_integer_range_reports_the_ceiling() {
        let input = ProfileInput { age: Some(5_000_000_000), ..complete_input() };
        expect_validation_error(input, "age MUST be <= 150, got 5000000000");
    }

    #[test]
    fn oversized_family_is_out_of_range_not_too_small() {
        let input = ProfileInput { family_size: Some(5_000_000_000), ..complete_input() };
        expect_validation_error(input, "family_size is out of range: 5000000000");
    }

    #[test]
    fn zero_family_size_is_rejected() {
        let input = ProfileInput { family_size: Some(0), ..complete_input() };
        expect_validation_error(input, "family_size MUST be >= 1");
    }

    #[test]
    fn negative_income_is_rejected() {
        let input = ProfileInput { annual_income: Some(-1.0), ..complete_input() };
        expect_validation_error(input, "annual_income");
    }

    #[test]
    fn unknown_gender_and_language_are_rejected() {
        let input = ProfileInput { gender: Some("unknown".to_string()), ..complete_input() };
        expect_validation_error(input, "gender MUST be one of");

        let input = ProfileInput { preferred_language: Some("fr".to_string()), ..complete_input() };
        expect_validation_error(input, "preferred_language MUST be one of");
    }

    #[test]
    fn blank_location_is_rejected() {
        let input = ProfileInput { district: Some("   ".to_string()), ..complete_input() };
        expect_validation_error(input, "district MUST be non-empty");
    }

    #[test]
    fn profile_json_deserialization_runs_validation() {
        let result = serde_json::from_str::<Profile>(r#"{"age": 30}"#);
        let err = match result {
            Ok(profile) => panic!("partial profile should not deserialize: {profile:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("missing required fields"), "unexpected error: {err}");
    }

    #[test]
    fn field_aliases_resolve_to_canonical_names() {
        assert_eq!(ProfileField::parse("income"), Some(ProfileField::AnnualIncome));
        assert_eq!(ProfileField::parse("caste"), Some(ProfileField::CasteCategory));
        assert_eq!(ProfileField::parse("disability_type"), None);
        assert_eq!(ProfileField::AnnualIncome.to_string(), "annual_income");
    }
}
