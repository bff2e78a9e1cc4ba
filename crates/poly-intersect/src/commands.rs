//! Subcommand handlers

use crate::settings::{Command, Settings};
use poly_intersect_lib::{Context, Executor, Graph, Result, analysis, wire};
use serde_json::Value as JsonValue;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Run the selected subcommand, returning the JSON document to print
pub fn execute(settings: &Settings) -> Result<JsonValue> {
    profiling::scope!("commands::execute");
    let config = settings.config();

    match &settings.command {
        Command::Run { graph, outputs } => {
            let graph = Graph::from_str(&read_input(graph)?)?;
            let context = Context::new(config);
            #[cfg(feature = "http")]
            let context = context.with_http()?;

            let outputs: Vec<&str> = outputs.iter().map(String::as_str).collect();
            tracing::info!(
                "Evaluating {} outputs of a {}-node graph",
                outputs.len(),
                graph.len()
            );
            let results = Executor::new(context).run(&graph, &outputs)?;
            Ok(JsonValue::Object(results.into_iter().collect()))
        }
        Command::Overlap {
            aoi,
            reference,
            geometry,
            ..
        } => {
            let aoi = wire::parse_str(&read_input(aoi)?)?;
            let reference = wire::parse_str(&read_input(reference)?)?;
            let report = analysis::overlap_report(&aoi, &reference, &config, *geometry)?;
            Ok(JsonValue::Object(report.into_iter().collect()))
        }
        Command::Buffer { aoi, .. } => {
            let aoi = wire::parse_str(&read_input(aoi)?)?;
            let buffers = analysis::dissolve_and_buffer(&aoi, &config.buffer_distances_km)?;
            Ok(wire::serialize(&buffers))
        }
    }
}

/// Reads a file, or stdin when the path is `-`
fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        Ok(input)
    } else {
        tracing::debug!("Reading {}", path.display());
        Ok(std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use poly_intersect_lib::Error;
    use serde_json::json;
    use std::path::PathBuf;

    fn write_temp(name: &str, contents: &JsonValue) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "poly-intersect-{}-{name}.json",
            std::process::id()
        ));
        std::fs::write(&path, contents.to_string()).unwrap();
        path
    }

    fn square_collection(x: f64, y: f64, size: f64) -> JsonValue {
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]
                    ]]
                }
            }]
        })
    }

    fn settings(args: &[&str]) -> Settings {
        Settings::try_parse_from(std::iter::once("poly-intersect").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_buffer_command() {
        let aoi = write_temp("buffer-aoi", &square_collection(-67.1, -13.2, 0.05));
        let aoi = aoi.to_str().unwrap();
        let output = execute(&settings(&["buffer", "--aoi", aoi, "--distance-km", "5"])).unwrap();

        let features = output["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["properties"]["name"], json!("user_poly"));
        assert_eq!(features[1]["properties"]["name"], json!("buffer_5km"));
    }

    #[test]
    fn test_overlap_command() {
        let aoi = write_temp("overlap-aoi", &square_collection(10.0, 10.0, 0.1));
        let aoi = aoi.to_str().unwrap();
        let output = execute(&settings(&[
            "overlap",
            "--aoi",
            aoi,
            "--reference",
            aoi,
            "--distance-km",
            "10",
            "--sequential",
        ]))
        .unwrap();

        let pct = output["pct_overlap_user"].as_f64().unwrap();
        assert!((pct - 100.0).abs() < 1e-6, "{pct}");
        assert!(output["areaHa_10km"].as_f64().unwrap() > output["areaHa_user"].as_f64().unwrap());
    }

    #[test]
    fn test_run_command() {
        let graph = json!({
            "aoi": ["geojson", square_collection(0.0, 0.0, 0.1)],
            "dissolved": ["dissolve", "aoi"],
            "local": ["project_local", "dissolved"],
            "area": ["get_area", "local"]
        });
        let graph = write_temp("run-graph", &graph);
        let output = execute(&settings(&[
            "run",
            "--graph",
            graph.to_str().unwrap(),
            "--output",
            "area",
        ]))
        .unwrap();

        let area = output["area"].as_f64().unwrap();
        // 0.1 x 0.1 degrees at the equator is about 12392 ha
        assert!((area - 12_392.0).abs() < 20.0, "{area}");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = execute(&settings(&["buffer", "--aoi", "/nonexistent/aoi.json"]));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
