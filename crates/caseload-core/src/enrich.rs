//! Categorical enrichment: fiscal period, age, CDBG eligibility and grant
//! fund tags.

use crate::config::PipelineConfig;
use crate::dates::{coerce, minus_years, whole_years_between, Timestamp};
use crate::model::{present, Demographics, FiscalPeriod, Flag, Quarter, ReportingRecord};

/// Fiscal year for a date; the fiscal year starting July 1 carries the
/// following calendar year's number.
#[must_use]
pub fn fiscal_year(date: Timestamp) -> i32 {
    if u8::from(date.month()) > 6 {
        date.year() + 1
    } else {
        date.year()
    }
}

/// Date used for fiscal attribution: the cohort start for satisfied cohort
/// programs, otherwise the intake date.
#[must_use]
pub fn enrollment_anchor(record: &ReportingRecord, config: &PipelineConfig) -> Option<Timestamp> {
    if record.kpis.enrollment_satisfied.is_yes()
        && config.is_cohort_program(record.intake.training_program.as_deref())
    {
        record.enrollment.cohort_date
    } else {
        record.intake.intake_date
    }
}

#[must_use]
pub fn fiscal_period(record: &ReportingRecord, config: &PipelineConfig) -> FiscalPeriod {
    let anchor = enrollment_anchor(record, config);
    let intake = record.intake.intake_date;
    FiscalPeriod {
        quarter: anchor.and_then(|date| Quarter::for_month(u8::from(date.month()))),
        fiscal_year: anchor.map(fiscal_year),
        intake_quarter: intake.and_then(|date| Quarter::for_month(u8::from(date.month()))),
        intake_fiscal_year: intake.map(fiscal_year),
    }
}

/// Whole years from date of birth to `now`. A birth date after `now` is a
/// two-digit-year rollover and is moved back by the configured years.
#[must_use]
pub fn age(dob: Option<&str>, now: Timestamp, rollover_years: i32) -> Option<i32> {
    let born = coerce(dob)?;
    let born = if born > now {
        minus_years(born, rollover_years)
    } else {
        born
    };
    Some(whole_years_between(now.date(), born.date()))
}

/// First five digits of a ZIP or ZIP+4 value.
#[must_use]
pub fn normalize_zip(raw: Option<&str>) -> Option<String> {
    let digits: String = present(raw)?
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-' || c.is_whitespace())
        .filter(char::is_ascii_digit)
        .take(5)
        .collect();
    (digits.len() == 5).then_some(digits)
}

#[must_use]
pub fn demographics(record: &ReportingRecord, config: &PipelineConfig, now: Timestamp) -> Demographics {
    let account = &record.account;
    let bc_resident = normalize_zip(account.address_zip.as_deref())
        .is_some_and(|zip| config.cdbg.zips.contains(&zip));
    let eligible = bc_resident
        && account
            .address_city
            .as_deref()
            .is_some_and(|city| city.contains(config.cdbg.city_substring.as_str()))
        && present(account.income_category.as_deref()).is_some()
        && present(account.race.as_deref()).is_some();

    Demographics {
        age: age(account.dob.as_deref(), now, config.dob_rollover_years),
        bc_resident: Flag::from(bc_resident),
        cdbg: if eligible {
            config.grant_tokens.cdbg.clone()
        } else {
            String::new()
        },
    }
}

/// Appends CDBG/SNAP/EARN tokens to the account's grant list when the
/// matching field is set and the token is missing, then strips any leading
/// delimiter.
#[must_use]
pub fn grant_fund(record: &ReportingRecord, config: &PipelineConfig) -> String {
    let tokens = &config.grant_tokens;
    let mut fund = record.account.grant_fund.clone().unwrap_or_default();

    for (applies, token) in [
        (record.demographics.cdbg == tokens.cdbg, &tokens.cdbg),
        (record.grants.snap_id.is_some(), &tokens.snap),
        (record.grants.earn_id.is_some(), &tokens.earn),
    ] {
        if applies && !fund.contains(token.as_str()) {
            fund.push_str(&tokens.delimiter);
            fund.push_str(token);
        }
    }

    let separator = tokens.delimiter.trim();
    let trimmed = fund.trim_start();
    let trimmed = if separator.is_empty() {
        trimmed
    } else {
        trimmed.trim_start_matches(separator).trim_start()
    };
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_timestamp;
    use crate::model::{AccountId, ClientAccount};

    fn at(raw: &str) -> Timestamp {
        match parse_timestamp(raw) {
            Some(value) => value,
            None => panic!("bad fixture timestamp {raw}"),
        }
    }

    fn baltimore_client(zip: &str) -> ReportingRecord {
        let mut account = ClientAccount::new(AccountId(11));
        account.address_city = Some("Baltimore".to_string());
        account.address_zip = Some(zip.to_string());
        account.income_category = Some("Extremely Low".to_string());
        account.race = Some("Black or African American".to_string());
        ReportingRecord::seed(account)
    }

    #[test]
    fn quarters_follow_july_fiscal_year() {
        let config = PipelineConfig::v1();
        for (intake, quarter, year) in [
            ("2023-08-14", Quarter::Q1, 2024),
            ("2024-02-14", Quarter::Q3, 2024),
            ("2023-11-14", Quarter::Q2, 2024),
            ("2024-06-30", Quarter::Q4, 2024),
            ("2024-07-01", Quarter::Q1, 2025),
        ] {
            let mut record = ReportingRecord::seed(ClientAccount::new(AccountId(1)));
            record.intake.intake_date = Some(at(intake));
            let period = fiscal_period(&record, &config);
            assert_eq!(period.quarter, Some(quarter), "{intake}");
            assert_eq!(period.fiscal_year, Some(year), "{intake}");
            assert_eq!(period.intake_quarter, Some(quarter), "{intake}");
        }
    }

    #[test]
    fn satisfied_cohort_programs_use_cohort_date() {
        let config = PipelineConfig::v1();
        let mut record = ReportingRecord::seed(ClientAccount::new(AccountId(1)));
        record.intake.intake_date = Some(at("2024-05-20"));
        record.intake.training_program = Some("MTDL".to_string());
        record.enrollment.cohort_date = Some(at("2024-07-08"));
        record.kpis.enrollment_satisfied = Flag::Yes;

        let period = fiscal_period(&record, &config);
        assert_eq!(period.quarter, Some(Quarter::Q1));
        assert_eq!(period.fiscal_year, Some(2025));
        assert_eq!(period.intake_quarter, Some(Quarter::Q4));
        assert_eq!(period.intake_fiscal_year, Some(2024));

        record.intake.training_program = Some("Forklift".to_string());
        assert_eq!(fiscal_period(&record, &config).fiscal_year, Some(2024));
    }

    #[test]
    fn cdbg_requires_zip_in_enumerated_set() {
        let config = PipelineConfig::v1();
        let now = at("2024-06-01");

        let inside = demographics(&baltimore_client("21215"), &config, now);
        assert_eq!(inside.cdbg, "CDBG");
        assert_eq!(inside.bc_resident, Flag::Yes);

        let plus_four = demographics(&baltimore_client("21215-3301"), &config, now);
        assert_eq!(plus_four.cdbg, "CDBG");

        let outside = demographics(&baltimore_client("21044"), &config, now);
        assert_eq!(outside.cdbg, "");
        assert_eq!(outside.bc_resident, Flag::No);
    }

    #[test]
    fn cdbg_requires_income_and_race() {
        let config = PipelineConfig::v1();
        let mut record = baltimore_client("21215");
        record.account.race = Some(" ".to_string());
        let result = demographics(&record, &config, at("2024-06-01"));
        assert_eq!(result.cdbg, "");
        assert_eq!(result.bc_resident, Flag::Yes);
    }

    #[test]
    fn future_birth_dates_roll_back_a_century() {
        let now = at("2024-06-01");
        assert_eq!(age(Some("03/15/85"), now, 100), Some(39));
        assert_eq!(age(Some("2063-03-15"), now, 100), Some(61));
        assert_eq!(age(Some("unknown"), now, 100), None);
        assert_eq!(age(None, now, 100), None);
    }

    #[test]
    fn grant_fund_appends_missing_tokens_once() {
        let config = PipelineConfig::v1();
        let mut record = baltimore_client("21215");
        record.demographics.cdbg = "CDBG".to_string();
        record.grants.snap_id = Some("S-1".to_string());
        record.grants.earn_id = Some("E-1".to_string());

        assert_eq!(grant_fund(&record, &config), "CDBG; SNAP; EARN");

        record.account.grant_fund = Some("WIOA; SNAP".to_string());
        assert_eq!(grant_fund(&record, &config), "WIOA; SNAP; CDBG; EARN");

        record.grants.earn_id = None;
        record.demographics.cdbg = String::new();
        record.account.grant_fund = None;
        assert_eq!(grant_fund(&record, &config), "SNAP");
    }
}
