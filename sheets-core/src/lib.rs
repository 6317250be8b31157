mod client;
mod oauth;

pub use client::{
    AppendValuesResponse, ApiErrorClass, InsertDataOption, MajorDimension, SheetsClient,
    SheetsError, UpdateValuesResponse, ValueInputOption, ValueRange,
};
pub use oauth::{ClientSecret, OAuthClient, OAuthError, OAuthToken};
