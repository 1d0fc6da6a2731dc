use thiserror::Error;

#[derive(Error, Debug)]
pub enum OffwatchError {
    #[error("IO error\n{0}")]
    Read(#[from] std::io::Error),

    #[error("askama templating error\n{0}")]
    Askama(#[from] askama::Error),

    #[error("reqwest error\n{0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("serde_yaml error\n{0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("serde_json error\n{0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("time format error\n{0}")]
    TimeFormat(#[from] time::error::Format),

    #[error("time parse error\n{0}")]
    TimeParse(#[from] time::error::Parse),

    #[error("row {index} unreadable: {reason}")]
    RowRead { index: usize, reason: String },

    #[error("page load error\n{0}")]
    PageLoad(String),

    #[error("cache io error\n{0}")]
    CacheIo(String),

    #[error("notify error\n{0}")]
    Notify(String),

    #[error("other error \n{0}")]
    Other(String),
}

impl actix_web::error::ResponseError for OffwatchError {}
