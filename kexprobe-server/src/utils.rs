use std::{
    fs::{self, File},
    io::{BufRead, BufReader, Cursor},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::Item;

use crate::error::Error;

const CONFIG_EXTENSIONS: [&str; 6] = ["json", "jsonc", "ron", "toml", "yaml", "yml"];
static CONFIG_NAMES: LazyLock<Vec<PathBuf>> = LazyLock::new(|| {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| PathBuf::from(format!("server.{}", ext)))
        .collect::<Vec<_>>()
});

#[cfg(unix)]
pub fn find_config() -> Option<PathBuf> {
    for config in CONFIG_NAMES.iter() {
        if config.exists() {
            return Some(config.clone());
        }
    }

    let xdg_dirs = if let Ok(xdg_dirs) = xdg::BaseDirectories::with_prefix("kexprobe") {
        xdg_dirs
    } else {
        return None;
    };

    for config in CONFIG_NAMES.iter() {
        if let Some(path) = xdg_dirs.find_config_file(config) {
            return Some(path);
        }
    }

    None
}

#[cfg(not(unix))]
pub fn find_config() -> Option<PathBuf> {
    for config in CONFIG_NAMES.iter() {
        if config.exists() {
            return Some(config.clone());
        }
    }

    None
}

pub fn load_certs<P: AsRef<Path>>(path: P) -> Result<Vec<CertificateDer<'static>>, Error> {
    let mut file = BufReader::new(File::open(&path)?);
    let mut certs = read_certs(&mut file);

    // Der format
    if certs.is_empty() {
        certs = vec![CertificateDer::from(fs::read(&path)?)];
    }

    Ok(certs)
}

pub fn load_priv_key<P: AsRef<Path>>(path: P) -> Result<PrivateKeyDer<'static>, Error> {
    let mut file = BufReader::new(File::open(&path)?);

    match read_priv_key(&mut file) {
        Some(key) => Ok(key),
        // Der format
        None => PrivateKeyDer::try_from(fs::read(&path)?).map_err(Error::InvalidPrivateKey),
    }
}

pub fn parse_pem_certs(pem: Vec<u8>) -> Result<Vec<CertificateDer<'static>>, Error> {
    let certs = read_certs(&mut Cursor::new(pem));

    if certs.is_empty() {
        return Err(Error::InvalidCertificate);
    }

    Ok(certs)
}

pub fn parse_pem_priv_key(pem: Vec<u8>) -> Result<PrivateKeyDer<'static>, Error> {
    read_priv_key(&mut Cursor::new(pem)).ok_or(Error::InvalidPrivateKey("no private key found in PEM"))
}

fn read_certs(rd: &mut dyn BufRead) -> Vec<CertificateDer<'static>> {
    let mut certs = Vec::new();

    while let Ok(Some(item)) = rustls_pemfile::read_one(rd) {
        if let Item::X509Certificate(cert) = item {
            certs.push(cert);
        }
    }

    certs
}

fn read_priv_key(rd: &mut dyn BufRead) -> Option<PrivateKeyDer<'static>> {
    let mut priv_key = None;

    while let Ok(Some(item)) = rustls_pemfile::read_one(rd) {
        match item {
            Item::Pkcs1Key(key) => priv_key = Some(PrivateKeyDer::from(key)),
            Item::Pkcs8Key(key) => priv_key = Some(PrivateKeyDer::from(key)),
            Item::Sec1Key(key) => priv_key = Some(PrivateKeyDer::from(key)),
            _ => {}
        }
    }

    priv_key
}

/// Escapes text for interpolation into HTML.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());

    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }

    out
}
