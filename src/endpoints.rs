//! The API endpoint URIs.
//!
//! For endpoints that take a parameter, e.g., '/api/users/{user_id}/candidates', use [format_endpoint].

/// The route for checking that the server is up.
pub const HEALTH: &str = "/api/health";
/// The route to run the pipeline on a user's uncategorized transactions.
pub const CATEGORIZE: &str = "/api/users/{user_id}/categorize";
/// The route to queue a background categorization job for a user.
pub const CATEGORIZE_BACKGROUND: &str = "/api/users/{user_id}/categorize/background";
/// The route to list a user's pending candidates.
pub const USER_CANDIDATES: &str = "/api/users/{user_id}/candidates";
/// The route to accept a candidate.
pub const ACCEPT_CANDIDATE: &str = "/api/candidates/{candidate_id}/accept";
/// The route to reject a candidate.
pub const REJECT_CANDIDATE: &str = "/api/candidates/{candidate_id}/reject";
/// The route to set the category of a transaction by hand.
pub const TRANSACTION_CATEGORY: &str = "/api/transactions/{transaction_id}/category";

/// Replace the parameter in `endpoint_path` with `id`.
///
/// A parameter starts with a left brace and ends with a right brace, e.g.
/// '{user_id}' in '/api/users/{user_id}/candidates'. Only the first parameter
/// is replaced. An unterminated parameter is replaced up to the end of the path.
///
/// If no parameter is found in `endpoint_path`, the function returns the
/// original `endpoint_path`.
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    let Some(start) = endpoint_path.find('{') else {
        return endpoint_path.to_owned();
    };

    let end = endpoint_path[start..]
        .find('}')
        .map_or(endpoint_path.len(), |offset| start + offset + 1);

    format!("{}{id}{}", &endpoint_path[..start], &endpoint_path[end..])
}
