//! Dockerfile templates for the builder and runtime images.

use crate::consts::CONTAINER_HOME;
use crate::variant::BuildType;

const CPU_BASE_IMAGE: &str = "registry.access.redhat.com/ubi8/ubi:8.8";
const MINICONDA_URL: &str = "https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-$(uname -m).sh";

/// Dockerfile for the image a containerized build runs in.
///
/// The build context holds the `open-ce` executable, which is installed into
/// the image so the same tool can be re-invoked inside the container.
pub fn builder_dockerfile(build_type: BuildType, cuda: Option<&str>) -> String {
  let base = match (build_type, cuda) {
    (BuildType::Cuda, Some(cuda)) => format!("nvidia/cuda:{}-devel-ubi8", cuda),
    _ => CPU_BASE_IMAGE.to_string(),
  };
  format!(
    r#"FROM {base}

ARG BUILD_ID=1084
ARG GROUP_ID=1500

RUN dnf install -y git patch bzip2 which && dnf clean all && \
    groupadd --gid ${{GROUP_ID}} builder && \
    useradd --uid ${{BUILD_ID}} --gid ${{GROUP_ID}} --home-dir {home} --create-home builder

COPY open-ce /usr/local/bin/open-ce

USER builder
WORKDIR {home}

RUN curl -fsSL -o miniconda.sh {miniconda} && \
    bash miniconda.sh -b -p {home}/conda && rm miniconda.sh && \
    {home}/conda/bin/conda install -y conda-build && \
    {home}/conda/bin/conda clean -y --all

ENV PATH={home}/conda/bin:$PATH
"#,
    base = base,
    home = CONTAINER_HOME,
    miniconda = MINICONDA_URL,
  )
}

/// Dockerfile for a runtime image: copies the local channel into the image
/// and creates the conda environment described by `CONDA_ENV_FILE`.
pub fn runtime_dockerfile() -> String {
  format!(
    r#"FROM {base}

ARG OPENCE_USER
ARG LOCAL_CONDA_CHANNEL
ARG CONDA_ENV_FILE
ARG TARGET_DIR

RUN dnf install -y bzip2 which && dnf clean all && \
    useradd --create-home ${{OPENCE_USER}}

USER ${{OPENCE_USER}}
WORKDIR /home/${{OPENCE_USER}}

COPY --chown=${{OPENCE_USER}} ${{LOCAL_CONDA_CHANNEL}} ${{TARGET_DIR}}

RUN curl -fsSL -o miniconda.sh {miniconda} && \
    bash miniconda.sh -b -p /home/${{OPENCE_USER}}/conda && rm miniconda.sh && \
    /home/${{OPENCE_USER}}/conda/bin/conda env create -n opence -f ${{TARGET_DIR}}/${{CONDA_ENV_FILE}} && \
    /home/${{OPENCE_USER}}/conda/bin/conda clean -y --all && \
    rm -rf ${{TARGET_DIR}}/.open-ce-image

ENV PATH=/home/${{OPENCE_USER}}/conda/envs/opence/bin:/home/${{OPENCE_USER}}/conda/bin:$PATH
"#,
    base = CPU_BASE_IMAGE,
    miniconda = MINICONDA_URL,
  )
}
