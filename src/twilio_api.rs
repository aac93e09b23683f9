use crate::error::AppError;
use crate::twilio_types::{AvailablePhoneNumberList, IncomingPhoneNumber};
use crate::utils::is_e164;

use std::collections::HashMap;
use tracing::{debug, error, info};

/// Minimal client for the parts of the Twilio REST API used to provision numbers.
pub struct TwilioClient {
    http_client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioClient {
    pub fn new(
        http_client: reqwest::Client,
        api_base: String,
        account_sid: String,
        auth_token: String,
    ) -> Self {
        Self {
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
        }
    }

    fn account_url(&self, resource: &str) -> String {
        let account_sid = &self.account_sid;
        format!("{}/2010-04-01/Accounts/{account_sid}/{resource}", self.api_base)
    }

    /// Search for one local number in `country` and buy it, returning the number in E.164
    /// form.  A purchase that fails after a successful search is not retried.
    pub async fn purchase_number(
        &self,
        country: &str,
        voice_url: Option<&str>,
    ) -> Result<String, AppError> {
        let country = normalize_country(country)?;
        let candidate = self.first_available_number(&country).await?;
        info!(country=%country, number=%candidate, "purchasing number");

        let mut form = HashMap::new();
        form.insert("PhoneNumber", candidate);
        if let Some(voice_url) = voice_url {
            form.insert("VoiceUrl", voice_url.to_string());
            form.insert("VoiceMethod", "POST".to_string());
        }
        let resp = self
            .http_client
            .post(self.account_url("IncomingPhoneNumbers.json"))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send purchase request to twilio");
                AppError::Http(e)
            })?;
        if !resp.status().is_success() {
            let err = AppError::from_response("twilio", resp).await;
            error!(error=%err, "twilio refused number purchase");
            return Err(err);
        }
        let purchased = resp.json::<IncomingPhoneNumber>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize twilio incoming number");
            AppError::Http(e)
        })?;
        debug!(sid=%purchased.sid, "purchased incoming number");
        if !is_e164(&purchased.phone_number) {
            return Err(AppError::UnexpectedResponse(
                "purchased number is not in E.164 format",
            ));
        }
        Ok(purchased.phone_number)
    }

    async fn first_available_number(&self, country: &str) -> Result<String, AppError> {
        let url = self.account_url(&format!("AvailablePhoneNumbers/{country}/Local.json"));
        let resp = self
            .http_client
            .get(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .query(&[("PageSize", "1")])
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send number search to twilio");
                AppError::Http(e)
            })?;
        if !resp.status().is_success() {
            let err = AppError::from_response("twilio", resp).await;
            error!(error=%err, "twilio number search failed");
            return Err(err);
        }
        let list = resp.json::<AvailablePhoneNumberList>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize twilio number search");
            AppError::Http(e)
        })?;
        list.available_phone_numbers
            .into_iter()
            .next()
            .map(|n| n.phone_number)
            .ok_or_else(|| AppError::NoNumbersAvailable(country.to_string()))
    }
}

/// Two-letter ISO country code, upper-cased.
fn normalize_country(country: &str) -> Result<String, AppError> {
    let country = country.trim();
    if country.len() == 2 && country.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(country.to_ascii_uppercase())
    } else {
        Err(AppError::InvalidCountry(country.to_string()))
    }
}
