pub const METRICS: &str = "/metrics";
pub const CAMERAS: &str = "/api/cameras";
pub const RECORD: &str = "/api/record";
pub const RECORD_START: &str = "/api/record-start";
pub const HLS: &str = "/hls";

pub const PLAYLIST: &str = "index.m3u8";

pub fn camera(id: &str) -> String {
    format!("/api/cameras/{}", id)
}

pub fn record_stop(session: &str) -> String {
    format!("/api/record-stop/{}", session)
}

pub fn download(filename: &str) -> String {
    format!("/api/download/{}", filename)
}

pub fn playlist(camera: &str) -> String {
    format!("{}/{}/{}", HLS, camera, PLAYLIST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(camera("cam1"), "/api/cameras/cam1");
        assert_eq!(camera("{id}"), "/api/cameras/{id}");
        assert_eq!(record_stop("ab12cd34"), "/api/record-stop/ab12cd34");
        assert_eq!(playlist("cam2"), "/hls/cam2/index.m3u8");
    }
}
