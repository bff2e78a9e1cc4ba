/// The closed set of operations a graph node may name
///
/// [`Operation::from_name`] is the whitelist: a graph naming anything else is rejected
/// before any node is evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `["geojson", collection]`
    GeoJson,
    /// `["esri:server", url, aoi, out_fields?, where?]`
    EsriServer,
    /// `["cartodb", sql_url, table, aoi, out_fields?, where?]`
    CartoDb,
    /// `["esri:imageserver", url, aoi]`
    EsriImageServer,
    /// `["dissolve", fc, field?]`
    Dissolve,
    /// `["intersect", a, b]`
    Intersect,
    /// `["erase", fc, other]`
    Erase,
    /// `["buffer_to_dist", fc, km]`
    BufferToDist,
    /// `["project_local", fc, frame?]` where frame is a local node, `"aeqd"` or `"laea"`
    ProjectLocal,
    /// `["project_global", fc]`
    ProjectGlobal,
    /// `["get_area", fc, field?]`
    GetArea,
    /// `["get_area_percent", fc, reference, aoi_field?, intersect_field?]`
    GetAreaPercent,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::GeoJson,
        Operation::EsriServer,
        Operation::CartoDb,
        Operation::EsriImageServer,
        Operation::Dissolve,
        Operation::Intersect,
        Operation::Erase,
        Operation::BufferToDist,
        Operation::ProjectLocal,
        Operation::ProjectGlobal,
        Operation::GetArea,
        Operation::GetAreaPercent,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Operation::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::GeoJson => "geojson",
            Operation::EsriServer => "esri:server",
            Operation::CartoDb => "cartodb",
            Operation::EsriImageServer => "esri:imageserver",
            Operation::Dissolve => "dissolve",
            Operation::Intersect => "intersect",
            Operation::Erase => "erase",
            Operation::BufferToDist => "buffer_to_dist",
            Operation::ProjectLocal => "project_local",
            Operation::ProjectGlobal => "project_global",
            Operation::GetArea => "get_area",
            Operation::GetAreaPercent => "get_area_percent",
        }
    }

    /// Accepted argument count (min, max), excluding the operation name
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Operation::GeoJson => (1, 1),
            Operation::EsriServer => (2, 4),
            Operation::CartoDb => (3, 5),
            Operation::EsriImageServer => (2, 2),
            Operation::Dissolve => (1, 2),
            Operation::Intersect | Operation::Erase | Operation::BufferToDist => (2, 2),
            Operation::ProjectLocal => (1, 2),
            Operation::ProjectGlobal => (1, 1),
            Operation::GetArea => (1, 2),
            Operation::GetAreaPercent => (2, 4),
        }
    }

    /// Argument positions that must hold a feature collection (a node or an inline document)
    pub fn collection_slots(&self) -> &'static [usize] {
        match self {
            Operation::GeoJson => &[],
            Operation::EsriServer | Operation::EsriImageServer => &[1],
            Operation::CartoDb => &[2],
            Operation::Intersect | Operation::Erase => &[0, 1],
            Operation::Dissolve
            | Operation::BufferToDist
            | Operation::ProjectLocal
            | Operation::ProjectGlobal
            | Operation::GetArea
            | Operation::GetAreaPercent => &[0],
        }
    }

    /// Remote input adapters perform network I/O
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Operation::EsriServer | Operation::CartoDb | Operation::EsriImageServer
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
