//! The route table, request handlers, and CORS policy
//!
//! Routing is a flat `(method, path)` table dispatched by lookup; anything
//! that misses the table gets the undefined-route response. Errors from the
//! extraction core are translated to status codes here and nowhere else.

use crate::http::{Method, Request, Response};
use crate::multipart;
use huemagik::PaletteParams;
use serde::Serialize;
use serde_json::json;

/// The immutable service configuration, built once at startup
#[derive(Debug)]
pub struct App {
    /// Origins allowed by CORS
    pub allowed_origins: Vec<String>,
    /// The maximum accepted request body size in bytes
    pub max_body_size: usize,
    /// Optional fixed seed for reproducible palettes
    pub seed: Option<u64>,
}

/// The routes this service serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// `GET /` liveness string
    Home,
    /// `GET /test` JSON health check
    Test,
    /// `POST /process_image` palette extraction
    ProcessImage,
    /// `OPTIONS /process_image` CORS preflight
    ProcessImagePreflight,
}

/// The route table: every (method, path) pair the service responds to
const ROUTES: &[(Method, &str, Route)] = &[
    (Method::Get, "/", Route::Home),
    (Method::Get, "/test", Route::Test),
    (Method::Post, "/process_image", Route::ProcessImage),
    (Method::Options, "/process_image", Route::ProcessImagePreflight),
];

/// Look up the route for a request, if any
fn lookup(method: Method, path: &str) -> Option<Route> {
    ROUTES
        .iter()
        .find(|&&(route_method, route_path, _)| route_method == method && route_path == path)
        .map(|&(_, _, route)| route)
}

/// Dispatch a request to its handler and apply the CORS policy to the result
pub async fn dispatch(app: &App, request: &Request) -> Response {
    let mut response = match lookup(request.method, &request.path) {
        Some(Route::Home) => home(),
        Some(Route::Test) => test(),
        Some(Route::ProcessImage) => process_image(app, request).await,
        Some(Route::ProcessImagePreflight) => Response::empty(204),
        None => undefined_route(&request.path),
    };

    apply_cors(app, request, &mut response);
    response
}

/// `GET /`
fn home() -> Response {
    log::info!("Home route accessed");
    Response::text(200, "HueMagik Backend is running successfully!")
}

/// `GET /test`
fn test() -> Response {
    log::info!("Test route accessed");
    Response::json(200, &json!({"message": "HueMagik Backend is working!"}))
}

/// The response for any (method, path) pair outside the route table
fn undefined_route(path: &str) -> Response {
    log::warn!("Undefined route accessed: {path}");
    Response::json(404, &json!({"error": format!("Undefined route: {path}")}))
}

/// The successful `POST /process_image` response body
#[derive(Serialize)]
struct PaletteResponse {
    /// The extracted colors as `[r, g, b]` triples
    colors: Vec<[u8; 3]>,
}

/// `POST /process_image`: extract a palette from the uploaded image
async fn process_image(app: &App, request: &Request) -> Response {
    log::info!("Received request to /process_image");

    let form = match multipart::parse(request.header("content-type"), &request.body) {
        Ok(form) => form,
        Err(error) => {
            log::warn!("No image file provided in the request ({error})");
            return no_image_response();
        }
    };

    let Some(file) = form.file("image") else {
        log::warn!("No image file provided in the request");
        return no_image_response();
    };

    let colors = match form.field("colors") {
        None => 5,
        Some(value) => match value.trim().parse::<i64>() {
            Ok(colors) => colors,
            Err(error) => {
                // The one place internal error text reaches the client,
                // matching the original service's catch-all behavior
                log::error!("Error in process_image: invalid colors field {value:?}: {error}");
                return Response::json(500, &json!({"error": format!("An error occurred: {error}")}));
            }
        },
    };

    log::info!("Processing image with {colors} colors");

    // Zero, negative, and absurdly large counts all fail inside extraction
    // with the same client-facing response, so collapse them to colors = 0
    let colors = u16::try_from(colors).unwrap_or(0);
    let params = PaletteParams {
        colors,
        seed: app.seed,
        ..PaletteParams::default()
    };

    let bytes = file.data.clone();
    let extraction = tokio::task::spawn_blocking(move || huemagik::extract_palette(&bytes, &params)).await;

    match extraction {
        Ok(Ok(palette)) => {
            let colors = palette
                .colors
                .iter()
                .map(|color| [color.red, color.green, color.blue])
                .collect::<Vec<_>>();
            log::info!("Processed colors: {colors:?}");
            Response::json(200, &json!(PaletteResponse { colors }))
        }
        Ok(Err(error)) => {
            log::error!("Failed to process image: {error}");
            Response::json(500, &json!({"error": "Failed to process image"}))
        }
        Err(error) => {
            log::error!("Error in process_image: extraction task failed: {error}");
            Response::json(500, &json!({"error": format!("An error occurred: {error}")}))
        }
    }
}

/// The 400 response for requests without an image file
fn no_image_response() -> Response {
    Response::json(400, &json!({"error": "No image file provided"}))
}

/// Add CORS headers when the request origin is allowlisted
fn apply_cors(app: &App, request: &Request, response: &mut Response) {
    let Some(origin) = request.header("origin") else {
        return;
    };
    if !app.allowed_origins.iter().any(|allowed| allowed == origin) {
        return;
    }

    let mut header = |name: &str, value: &str| {
        response.headers.push((name.to_owned(), value.to_owned()));
    };

    header("Access-Control-Allow-Origin", origin);
    header("Vary", "Origin");
    header("Access-Control-Allow-Credentials", "true");
    header("Access-Control-Expose-Headers", "Access-Control-Allow-Origin");

    if request.method == Method::Options {
        header("Access-Control-Allow-Methods", "GET, POST, OPTIONS");
        header("Access-Control-Allow-Headers", "Content-Type, Authorization");
    }
}
